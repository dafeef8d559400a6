//! ftr-rc library - Collection intake service
//!
//! Registers plant collections (location, optional new species, photos,
//! traceability code) and anchors each one to an NFT whose metadata is
//! pinned on IPFS.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod anchor;
pub mod api;
pub mod error;
pub mod intake;
pub mod pagination;
pub mod reader;
pub mod storage;

use anchor::AnchorService;
use storage::ObjectStore;

/// Request body limit; covers five 5 MB photos plus form fields
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Bucket directory served read-only under `/storage/<bucket>`
#[derive(Debug, Clone)]
pub struct StaticStorage {
    pub bucket: String,
    pub dir: PathBuf,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Photo bucket
    pub store: Arc<dyn ObjectStore>,
    pub anchoring: Arc<AnchorService>,
    /// Delay before the background worker first looks at a new outbox row
    pub anchor_delay_ms: i64,
    pub static_storage: Option<StaticStorage>,
}

impl AppState {
    pub fn new(db: SqlitePool, store: Arc<dyn ObjectStore>, anchoring: Arc<AnchorService>) -> Self {
        Self {
            db,
            store,
            anchoring,
            anchor_delay_ms: 0,
            static_storage: None,
        }
    }

    pub fn with_anchor_delay_ms(mut self, delay_ms: i64) -> Self {
        self.anchor_delay_ms = delay_ms;
        self
    }

    pub fn with_static_storage(mut self, bucket: impl Into<String>, dir: PathBuf) -> Self {
        self.static_storage = Some(StaticStorage {
            bucket: bucket.into(),
            dir,
        });
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(api::recoleccion_routes())
        .merge(api::health_routes());

    if let Some(storage) = &state.static_storage {
        router = router.nest_service(
            &format!("/storage/{}", storage.bucket),
            ServeDir::new(&storage.dir),
        );
    }

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
