//! Transactional write sequence
//!
//! Photos go to object storage first, before any write lock is taken. Location,
//! optional new plant, traceability counter, collection, photo rows and the
//! anchoring outbox row are then written in one SQLite transaction. Storage
//! does not take part in the transaction, so uploaded objects are deleted
//! explicitly whenever the transaction does not commit.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info, warn};

use super::form::{CreateRecoleccion, Especie};
use super::trace_code::next_trace_code;
use crate::anchor::outbox;
use crate::error::{ApiError, ApiResult};
use crate::storage::{sanitize_file_name, ObjectStore};

/// Identifiers of a freshly committed collection
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub recoleccion_id: i64,
    pub codigo_trazabilidad: String,
}

/// Uploaded photo metadata, pending its database row
#[derive(Debug, Clone)]
struct StoredPhoto {
    url: String,
    peso_bytes: i64,
    formato: String,
}

/// Persist a validated request; on failure nothing survives
///
/// `anchor_delay_ms` schedules the outbox row's first background attempt.
pub async fn write_recoleccion(
    pool: &SqlitePool,
    store: &dyn ObjectStore,
    request: &CreateRecoleccion,
    usuario_id: i64,
    anchor_delay_ms: i64,
) -> ApiResult<WriteOutcome> {
    let mut uploaded: Vec<String> = Vec::new();
    let photos = match upload_photos(store, request, &mut uploaded).await {
        Ok(photos) => photos,
        Err(err) => {
            remove_uploaded(store, &uploaded).await;
            return Err(err);
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            remove_uploaded(store, &uploaded).await;
            return Err(db_failure("Error al crear recolección", e));
        }
    };

    let result = write_steps(&mut tx, request, &photos, usuario_id, anchor_delay_ms).await;

    match result {
        Ok(outcome) => match tx.commit().await {
            Ok(()) => {
                info!(
                    recoleccion_id = outcome.recoleccion_id,
                    codigo = %outcome.codigo_trazabilidad,
                    "Recolección creada"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Commit failed");
                remove_uploaded(store, &uploaded).await;
                Err(ApiError::Internal("Error al crear recolección".to_string()))
            }
        },
        Err(err) => {
            warn!(error = %err, "Write sequence failed, rolling back");
            if let Err(e) = tx.rollback().await {
                error!(error = %e, "Rollback failed");
            }
            remove_uploaded(store, &uploaded).await;
            Err(err)
        }
    }
}

/// Store every photo; `uploaded` tracks what must be removed on failure
async fn upload_photos(
    store: &dyn ObjectStore,
    request: &CreateRecoleccion,
    uploaded: &mut Vec<String>,
) -> ApiResult<Vec<StoredPhoto>> {
    let mut photos = Vec::with_capacity(request.fotos.len());
    if request.fotos.is_empty() {
        return Ok(photos);
    }

    let stamp = Utc::now().timestamp_millis();
    for (index, foto) in request.fotos.iter().enumerate() {
        let path = format!(
            "{}_{}_{}",
            stamp,
            index,
            sanitize_file_name(&foto.original_name)
        );
        store
            .upload(&path, &foto.bytes, &foto.content_type)
            .await
            .map_err(|e| {
                error!(error = %e, path = %path, "Photo upload failed");
                ApiError::Internal("Error al subir foto".to_string())
            })?;
        uploaded.push(path.clone());

        photos.push(StoredPhoto {
            url: store.public_url(&path),
            peso_bytes: foto.size() as i64,
            formato: foto.format(),
        });
    }
    info!(count = photos.len(), "Fotos subidas");
    Ok(photos)
}

async fn write_steps(
    conn: &mut SqliteConnection,
    request: &CreateRecoleccion,
    photos: &[StoredPhoto],
    usuario_id: i64,
    anchor_delay_ms: i64,
) -> ApiResult<WriteOutcome> {
    info!(
        fecha = %request.fecha,
        cantidad = request.cantidad,
        unidad = %request.unidad,
        tipo_material = %request.tipo_material,
        usuario_id,
        "Creando recolección"
    );

    // Step 1: location
    let ubicacion = &request.ubicacion;
    let ubicacion_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO ubicacion (pais_id, division_id, nombre, referencia, latitud, longitud, precision_m, fuente)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(ubicacion.pais_id)
    .bind(ubicacion.division_id)
    .bind(&ubicacion.nombre)
    .bind(&ubicacion.referencia)
    .bind(ubicacion.latitud)
    .bind(ubicacion.longitud)
    .bind(ubicacion.precision_m)
    .bind(ubicacion.fuente.map(|f| f.as_str()))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_failure("Error al crear ubicación", e))?;
    info!(ubicacion_id, "Paso 1: ubicación creada");

    // Step 2: plant
    let planta_id = match &request.especie {
        Especie::Nueva(planta) => {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO planta (especie, nombre_cientifico, variedad, tipo_planta, tipo_planta_otro, fuente)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&planta.especie)
            .bind(&planta.nombre_cientifico)
            .bind(&planta.variedad)
            .bind(&planta.tipo_planta)
            .bind(&planta.tipo_planta_otro)
            .bind(planta.fuente.map(|f| f.as_str()))
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| db_failure("Error al crear planta", e))?;
            info!(planta_id = id, "Paso 2: nueva planta creada");
            id
        }
        Especie::Existente(id) => {
            info!(planta_id = id, "Paso 2: usando planta existente");
            *id
        }
    };

    // Step 3: traceability code
    let codigo = next_trace_code(&mut *conn, request.fecha)
        .await
        .map_err(|e| db_failure("Error al generar código de trazabilidad", e))?;
    info!(codigo = %codigo, "Paso 3: código de trazabilidad generado");

    // Step 4: collection record
    let recoleccion_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO recoleccion (
            fecha, nombre_cientifico, nombre_comercial, cantidad, unidad, tipo_material,
            estado, especie_nueva, observaciones, usuario_id, ubicacion_id, vivero_id,
            metodo_id, planta_id, codigo_trazabilidad
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(request.fecha)
    .bind(request.nombre_cientifico_registro())
    .bind(&request.nombre_comercial)
    .bind(request.cantidad)
    .bind(&request.unidad)
    .bind(request.tipo_material.as_str())
    .bind(request.estado.as_str())
    .bind(request.especie_nueva())
    .bind(&request.observaciones)
    .bind(usuario_id)
    .bind(ubicacion_id)
    .bind(request.vivero_id)
    .bind(request.metodo_id)
    .bind(planta_id)
    .bind(&codigo)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            warn!(codigo = %codigo, "Duplicate traceability code");
            ApiError::Conflict(format!("El código de trazabilidad {} ya existe", codigo))
        } else {
            db_failure("Error al crear recolección", e)
        }
    })?;
    info!(recoleccion_id, "Paso 4: recolección creada");

    // Step 5: photo rows
    for photo in photos {
        sqlx::query(
            "INSERT INTO recoleccion_foto (recoleccion_id, url, peso_bytes, formato) VALUES (?, ?, ?, ?)",
        )
        .bind(recoleccion_id)
        .bind(&photo.url)
        .bind(photo.peso_bytes)
        .bind(&photo.formato)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_failure("Error al guardar fotos", e))?;
    }
    if !photos.is_empty() {
        info!(count = photos.len(), "Paso 5: fotos registradas");
    }

    // Step 6: anchoring outbox
    let first_attempt = Utc::now().timestamp_millis() + anchor_delay_ms;
    outbox::enqueue(&mut *conn, recoleccion_id, first_attempt)
        .await
        .map_err(|e| db_failure("Error al registrar anclaje pendiente", e))?;

    Ok(WriteOutcome {
        recoleccion_id,
        codigo_trazabilidad: codigo,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn db_failure(message: &str, err: sqlx::Error) -> ApiError {
    error!(error = %err, "{}", message);
    ApiError::Internal(message.to_string())
}

async fn remove_uploaded(store: &dyn ObjectStore, uploaded: &[String]) {
    if uploaded.is_empty() {
        return;
    }
    match store.remove(uploaded).await {
        Ok(()) => info!(count = uploaded.len(), "Removed uploaded photos"),
        Err(e) => error!(error = %e, paths = ?uploaded, "Failed to remove uploaded photos"),
    }
}
