//! Caller resolution and reference checks
//!
//! Read-only. Everything here runs before the write sequence starts so a
//! missing reference never leaves partial rows behind.

use ftr_common::db::Usuario;
use ftr_common::types::Rol;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::form::{CreateRecoleccion, Especie};
use crate::error::{ApiError, ApiResult};

/// Look up the internal user for an external auth identifier
pub async fn resolve_usuario(pool: &SqlitePool, auth_id: &str) -> ApiResult<Usuario> {
    let usuario = sqlx::query_as::<_, Usuario>(
        "SELECT id, auth_id, nombre, username, correo, rol FROM usuario WHERE auth_id = ?",
    )
    .bind(auth_id)
    .fetch_optional(pool)
    .await?;

    match usuario {
        Some(usuario) => {
            info!(
                usuario_id = usuario.id,
                nombre = %usuario.nombre,
                auth_id,
                "Usuario encontrado"
            );
            Ok(usuario)
        }
        None => Err(ApiError::NotFound(format!(
            "Usuario con auth_id {} no encontrado",
            auth_id
        ))),
    }
}

/// Only ADMIN and TECNICO users may register collections
pub fn authorize_creation(usuario: &Usuario) -> ApiResult<Rol> {
    match Rol::parse(&usuario.rol) {
        Some(rol) if rol.can_create_collections() => Ok(rol),
        _ => Err(ApiError::Forbidden(
            "No tienes permisos para crear recolecciones. Solo usuarios con rol ADMIN o TECNICO pueden realizar esta acción."
                .to_string(),
        )),
    }
}

/// Verify every referenced entity exists
pub async fn verify_references(pool: &SqlitePool, request: &CreateRecoleccion) -> ApiResult<()> {
    if let Some(vivero_id) = request.vivero_id {
        if !exists(pool, "SELECT 1 FROM vivero WHERE id = ?", vivero_id).await? {
            return Err(ApiError::NotFound("Vivero no encontrado".to_string()));
        }
    }

    if !exists(pool, "SELECT 1 FROM metodo_recoleccion WHERE id = ?", request.metodo_id).await? {
        return Err(ApiError::NotFound(
            "Método de recolección no encontrado".to_string(),
        ));
    }

    if let Especie::Existente(planta_id) = request.especie {
        if !exists(pool, "SELECT 1 FROM planta WHERE id = ?", planta_id).await? {
            return Err(ApiError::NotFound("Planta no encontrada".to_string()));
        }
    }

    if let Some(pais_id) = request.ubicacion.pais_id {
        if !exists(pool, "SELECT 1 FROM pais WHERE id = ?", pais_id).await? {
            return Err(ApiError::NotFound("País no encontrado".to_string()));
        }
    }

    if let Some(division_id) = request.ubicacion.division_id {
        if !exists(pool, "SELECT 1 FROM division_administrativa WHERE id = ?", division_id).await? {
            return Err(ApiError::NotFound(
                "División administrativa no encontrada".to_string(),
            ));
        }
    }

    debug!("All references resolved");
    Ok(())
}

async fn exists(pool: &SqlitePool, sql: &str, id: i64) -> Result<bool, sqlx::Error> {
    let row: Option<i64> = sqlx::query_scalar(sql).bind(id).fetch_optional(pool).await?;
    Ok(row.is_some())
}
