//! Collection endpoints
//!
//! - `POST /api/recolecciones` multipart creation (fields + up to 5 `fotos`)
//! - `GET /api/recolecciones` caller's own collections
//! - `GET /api/recolecciones/vivero/:vivero_id` a nursery's collections
//! - `GET /api/recolecciones/:id` one collection

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::intake::{create_recoleccion, nest_fields, PhotoUpload};
use crate::intake::resolver::resolve_usuario;
use crate::reader::{
    fetch_detalle, list_recolecciones, ListFilters, ListScope, RecoleccionDetalle, RecoleccionPage,
};
use crate::AppState;

/// Header carrying the caller's external auth identifier
pub const AUTH_ID_HEADER: &str = "x-auth-id";

/// Multipart field names accepted as photos
const PHOTO_FIELDS: &[&str] = &["fotos", "fotos[]"];

/// `{success: true, data}` envelope
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

pub fn recoleccion_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/recolecciones",
            get(list_own_recolecciones).post(post_recoleccion),
        )
        .route(
            "/api/recolecciones/vivero/:vivero_id",
            get(list_vivero_recolecciones),
        )
        .route("/api/recolecciones/:id", get(get_recoleccion))
}

fn auth_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTH_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_id(raw: &str, field: &str) -> ApiResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::Validation(format!("{} debe ser un número entero", field)))
}

/// Split a multipart body into text fields and photo files
async fn read_multipart(
    mut multipart: Multipart,
) -> ApiResult<(Vec<(String, String)>, Vec<PhotoUpload>)> {
    let mut fields = Vec::new();
    let mut fotos = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Cuerpo multipart inválido: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() {
            let original_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Cuerpo multipart inválido: {}", e)))?;

            if PHOTO_FIELDS.contains(&name.as_str()) {
                fotos.push(PhotoUpload {
                    original_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                // Surfaces as an unknown property during normalization
                fields.push((name, String::new()));
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::Validation(format!("Cuerpo multipart inválido: {}", e)))?;
            fields.push((name, value));
        }
    }

    debug!(fields = fields.len(), fotos = fotos.len(), "Multipart body read");
    Ok((fields, fotos))
}

/// POST /api/recolecciones
pub async fn post_recoleccion(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<DataResponse<RecoleccionDetalle>>)> {
    let (fields, fotos) = read_multipart(multipart).await?;
    let detalle = create_recoleccion(&state, auth_id(&headers), nest_fields(fields), fotos).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(detalle))))
}

/// GET /api/recolecciones
pub async fn list_own_recolecciones(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<ListFilters>,
) -> ApiResult<Json<RecoleccionPage>> {
    let auth_id = auth_id(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Header x-auth-id es requerido".to_string()))?;
    let usuario = resolve_usuario(&state.db, auth_id).await?;

    let page = list_recolecciones(&state.db, ListScope::Usuario(usuario.id), &filters).await?;
    Ok(Json(page))
}

/// GET /api/recolecciones/vivero/:vivero_id
pub async fn list_vivero_recolecciones(
    State(state): State<AppState>,
    Path(vivero_id): Path<String>,
    Query(filters): Query<ListFilters>,
) -> ApiResult<Json<RecoleccionPage>> {
    let vivero_id = parse_id(&vivero_id, "vivero_id")?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM vivero WHERE id = ?")
        .bind(vivero_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound("Vivero no encontrado".to_string()));
    }

    let page = list_recolecciones(&state.db, ListScope::Vivero(vivero_id), &filters).await?;
    Ok(Json(page))
}

/// GET /api/recolecciones/:id
pub async fn get_recoleccion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DataResponse<RecoleccionDetalle>>> {
    let id = parse_id(&id, "id")?;
    let detalle = fetch_detalle(&state.db, id).await?;
    Ok(Json(DataResponse::new(detalle)))
}
