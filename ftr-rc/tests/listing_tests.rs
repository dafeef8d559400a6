//! Integration tests for the collection listings
//!
//! Tests cover:
//! - Own-records listing (auth, ordering, filters, pagination)
//! - Nursery listing

mod helpers;

use axum::http::StatusCode;
use chrono::{Duration, Local, NaiveDate};
use tower::util::ServiceExt; // for `oneshot` method

use helpers::*;

fn days_ago(days: i64) -> NaiveDate {
    Local::now().date_naive() - Duration::days(days)
}

async fn create(app: &TestApp, auth_id: &str, fields: Vec<(String, String)>) {
    let response = app
        .router
        .clone()
        .oneshot(create_request(Some(auth_id), &fields, 0))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

/// Four collections: three by the admin, one by the technician
async fn seeded_app() -> TestApp {
    let app = setup_app().await;

    let mut oldest = valid_fields(days_ago(20));
    set_field(&mut oldest, "tipo_material", "ESTACA");
    create(&app, ADMIN, oldest).await;

    let mut middle = valid_fields(days_ago(10));
    set_field(&mut middle, "nombre_comercial", "Cedro");
    set_field(&mut middle, "vivero_id", "2");
    create(&app, ADMIN, middle).await;

    create(&app, ADMIN, valid_fields(days_ago(2))).await;
    create(&app, TECNICO, valid_fields(days_ago(1))).await;

    app
}

async fn list(app: &TestApp, uri: &str, auth_id: Option<&str>) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(get_request(uri, auth_id))
        .await
        .unwrap();
    let status = response.status();
    (status, extract_json(response.into_body()).await)
}

fn fechas(body: &serde_json::Value) -> Vec<String> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["fecha"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_own_listing_requires_header() {
    let app = setup_app().await;
    let (status, body) = list(&app, "/api/recolecciones", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Header x-auth-id es requerido");

    let (status, _) = list(&app, "/api/recolecciones", Some("auth-nobody")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_own_listing_newest_first() {
    let app = seeded_app().await;
    let (status, body) = list(&app, "/api/recolecciones", Some(ADMIN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let expected: Vec<String> = [2, 10, 20]
        .iter()
        .map(|d| days_ago(*d).format("%Y-%m-%d").to_string())
        .collect();
    assert_eq!(fechas(&body), expected);

    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["page"], 1);
    assert_eq!(body["pagination"]["limit"], 10);
    assert_eq!(body["pagination"]["totalPages"], 1);
    assert_eq!(body["pagination"]["hasNextPage"], false);

    // Listing items carry the joined shape
    assert_eq!(body["data"][0]["usuario"]["nombre"], "Ana Quispe");
    assert!(body["data"][0]["fotos"].is_array());
}

#[tokio::test]
async fn test_own_listing_filters() {
    let app = seeded_app().await;

    let (_, body) = list(&app, "/api/recolecciones?tipo_material=ESTACA", Some(ADMIN)).await;
    assert_eq!(fechas(&body), vec![days_ago(20).format("%Y-%m-%d").to_string()]);

    let (_, body) = list(&app, "/api/recolecciones?search=cedro", Some(ADMIN)).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["nombre_comercial"], "Cedro");

    let (_, body) = list(&app, "/api/recolecciones?q=CED", Some(ADMIN)).await;
    assert_eq!(body["pagination"]["total"], 1);

    let (_, body) = list(&app, "/api/recolecciones?vivero_id=2", Some(ADMIN)).await;
    assert_eq!(body["pagination"]["total"], 1);

    let uri = format!(
        "/api/recolecciones?fecha_inicio={}&fecha_fin={}",
        days_ago(15).format("%Y-%m-%d"),
        days_ago(2).format("%Y-%m-%d")
    );
    let (_, body) = list(&app, &uri, Some(ADMIN)).await;
    assert_eq!(body["pagination"]["total"], 2);
}

#[tokio::test]
async fn test_own_listing_rejects_bad_filters() {
    let app = seeded_app().await;
    let (status, body) = list(&app, "/api/recolecciones?estado=PERDIDO", Some(ADMIN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_own_listing_pagination() {
    let app = seeded_app().await;
    let (_, body) = list(&app, "/api/recolecciones?page=2&limit=2", Some(ADMIN)).await;

    assert_eq!(fechas(&body), vec![days_ago(20).format("%Y-%m-%d").to_string()]);
    assert_eq!(body["pagination"]["totalPages"], 2);
    assert_eq!(body["pagination"]["hasNextPage"], false);
    assert_eq!(body["pagination"]["hasPrevPage"], true);

    let (_, body) = list(&app, "/api/recolecciones?limit=500", Some(ADMIN)).await;
    assert_eq!(body["pagination"]["limit"], 50);
}

#[tokio::test]
async fn test_vivero_listing() {
    let app = seeded_app().await;

    let (status, body) = list(&app, "/api/recolecciones/vivero/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(
        fechas(&body)[0],
        days_ago(1).format("%Y-%m-%d").to_string()
    );

    let (_, body) = list(&app, "/api/recolecciones/vivero/2", None).await;
    assert_eq!(body["pagination"]["total"], 1);

    let (status, body) = list(&app, "/api/recolecciones/vivero/99", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Vivero no encontrado");
}
