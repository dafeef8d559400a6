//! Collection creation workflow

use serde_json::{Map, Value};
use tracing::info;

use super::form::normalize;
use super::photos::PhotoUpload;
use super::resolver::{authorize_creation, resolve_usuario, verify_references};
use super::writer::write_recoleccion;
use crate::error::{ApiError, ApiResult};
use crate::reader::{fetch_detalle, RecoleccionDetalle};
use crate::AppState;

/// Create a collection on behalf of the caller identified by `auth_id`
///
/// Check order: payload (400), header (401), user (404), role (403),
/// references (404). Nothing is written before all of them pass. Anchoring
/// failures are recorded on the outbox and never fail the request.
pub async fn create_recoleccion(
    state: &AppState,
    auth_id: Option<&str>,
    fields: Map<String, Value>,
    fotos: Vec<PhotoUpload>,
) -> ApiResult<RecoleccionDetalle> {
    let today = chrono::Local::now().date_naive();
    let request = normalize(fields, fotos, today)?;

    let auth_id = auth_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Header x-auth-id es requerido".to_string()))?;

    let usuario = resolve_usuario(&state.db, auth_id).await?;
    let rol = authorize_creation(&usuario)?;
    info!(usuario_id = usuario.id, rol = %rol, "Creando recolección");

    verify_references(&state.db, &request).await?;

    let outcome = write_recoleccion(
        &state.db,
        state.store.as_ref(),
        &request,
        usuario.id,
        state.anchor_delay_ms,
    )
    .await?;

    state.anchoring.attempt(&state.db, outcome.recoleccion_id).await;

    fetch_detalle(&state.db, outcome.recoleccion_id).await
}
