//! Shared fixtures for ftr-rc integration tests
//!
//! In-memory database with a small seeded catalog, in-memory fakes for the
//! photo bucket, the pinning service and the chain client, and a
//! hand-rolled multipart body builder.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request},
    Router,
};
use chrono::{Duration, Local, NaiveDate};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use ftr_common::db::init_memory_database;
use ftr_rc::anchor::{
    AnchorService, AnchorSettings, ChainClient, MintReceipt, PinnedDocument, PinningService,
};
use ftr_rc::storage::ObjectStore;
use ftr_rc::{build_router, AppState};

pub const ADMIN: &str = "auth-admin";
pub const TECNICO: &str = "auth-tecnico";
pub const GENERAL: &str = "auth-general";

pub const CONTRACT: &str = "0x4bb21533f7803BBce74421f6bdfc4B6c57706EA2";
pub const EXPLORER: &str = "https://shannon-explorer.somnia.network";

/// Photo bucket kept in memory
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_uploads: AtomicBool,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("bucket unavailable"));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(path) {
            return Err(anyhow!("object {} already exists", path));
        }
        objects.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("http://storage.test/recoleccion_fotos/{}", path)
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}

/// Photo bucket whose uploads wait until released
///
/// `started` is signalled when an upload begins; the upload then blocks on
/// `release`.
#[derive(Default)]
pub struct GatedStore {
    pub inner: MemoryStore,
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl ObjectStore for GatedStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.upload(path, bytes, content_type).await
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        self.inner.remove(paths).await
    }
}

/// Pinning service recording every pinned document
#[derive(Default)]
pub struct FakePinning {
    pub fail: AtomicBool,
    pub pinned: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl PinningService for FakePinning {
    async fn pin_json(&self, content: &Value, name: &str) -> Result<PinnedDocument> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("Pinata API error: 503 - unavailable"));
        }
        let mut pinned = self.pinned.lock().unwrap();
        pinned.push((name.to_string(), content.clone()));
        let cid = format!("bafytest{}", pinned.len());
        Ok(PinnedDocument::new(&cid, name, Some(256), "gateway.test"))
    }
}

/// Chain client handing out sequential token ids
///
/// The transaction hash encodes the token id, so a confirmation only needs
/// the hash.
#[derive(Default)]
pub struct FakeChain {
    pub fail: AtomicBool,
    pub fail_confirm: AtomicBool,
    pub minted: Mutex<Vec<(String, String)>>,
    pub confirmed: Mutex<Vec<String>>,
    next_token: AtomicUsize,
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn submit_mint(&self, to: &str, token_uri: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("safeMint failed: insufficient funds"));
        }
        self.minted
            .lock()
            .unwrap()
            .push((to.to_string(), token_uri.to_string()));
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{:064x}", token))
    }

    async fn confirm_mint(&self, tx_hash: &str) -> Result<MintReceipt> {
        if self.fail_confirm.load(Ordering::SeqCst) {
            return Err(anyhow!("Failed to get mint receipt: connection reset"));
        }
        self.confirmed.lock().unwrap().push(tx_hash.to_string());
        let token = u64::from_str_radix(tx_hash.trim_start_matches("0x"), 16)?;
        Ok(MintReceipt {
            transaction_hash: tx_hash.to_string(),
            block_number: Some(100 + token),
            token_id: token.to_string(),
        })
    }

    fn contract_address(&self) -> &str {
        CONTRACT
    }
}

pub fn anchor_settings(max_attempts: i64) -> AnchorSettings {
    AnchorSettings {
        recipient: "0x2440783D1d86D91118E7e19F62889dDc96775868".to_string(),
        explorer_base_url: EXPLORER.to_string(),
        backoff_base_ms: 30_000,
        max_attempts,
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: SqlitePool,
    pub store: Arc<MemoryStore>,
    pub pinning: Arc<FakePinning>,
    pub chain: Arc<FakeChain>,
    pub anchoring: Arc<AnchorService>,
}

/// App without anchoring integrations
pub async fn setup_app() -> TestApp {
    build_app(false, 3).await
}

/// App with fake pinning and chain clients
pub async fn setup_anchoring_app(max_attempts: i64) -> TestApp {
    build_app(true, max_attempts).await
}

async fn build_app(anchoring_enabled: bool, max_attempts: i64) -> TestApp {
    let db = setup_db().await;
    let store = Arc::new(MemoryStore::default());
    let pinning = Arc::new(FakePinning::default());
    let chain = Arc::new(FakeChain::default());

    let mut service = AnchorService::new(anchor_settings(max_attempts));
    if anchoring_enabled {
        service = service
            .with_pinning(pinning.clone())
            .with_chain(chain.clone());
    }
    let anchoring = Arc::new(service);

    let state = AppState::new(db.clone(), store.clone(), anchoring.clone());
    TestApp {
        router: build_router(state),
        db,
        store,
        pinning,
        chain,
        anchoring,
    }
}

/// Memory database with users, catalog entries and a division tree
pub async fn setup_db() -> SqlitePool {
    let db = init_memory_database().await.expect("Should create memory database");
    seed_db(&db).await;
    db
}

/// Users, catalog entries and a division tree shared by every test database
pub async fn seed_db(db: &SqlitePool) {
    let statements = [
        "INSERT INTO usuario (id, auth_id, nombre, username, correo, rol) VALUES (1, 'auth-admin', 'Ana Quispe', 'ana', 'ana@example.org', 'ADMIN')",
        "INSERT INTO usuario (id, auth_id, nombre, rol) VALUES (2, 'auth-tecnico', 'Luis Mamani', 'TECNICO')",
        "INSERT INTO usuario (id, auth_id, nombre, rol) VALUES (3, 'auth-general', 'Rosa Choque', 'GENERAL')",
        "INSERT INTO pais (id, codigo_iso2, nombre) VALUES (1, 'BO', 'Bolivia')",
        "INSERT INTO division_administrativa (id, pais_id, padre_id, tipo, nombre) VALUES (1, 1, NULL, 'DEPARTAMENTO', 'La Paz')",
        "INSERT INTO division_administrativa (id, pais_id, padre_id, tipo, nombre) VALUES (2, 1, 1, 'PROVINCIA', 'Murillo')",
        "INSERT INTO ubicacion (id, pais_id, latitud, longitud, nombre) VALUES (100, 1, -16.5, -68.1, 'Sede vivero')",
        "INSERT INTO vivero (id, codigo, nombre, ubicacion_id) VALUES (1, 'VIV-001', 'Vivero Central', 100)",
        "INSERT INTO vivero (id, codigo, nombre) VALUES (2, 'VIV-002', 'Vivero Norte')",
        "INSERT INTO metodo_recoleccion (id, nombre, descripcion) VALUES (1, 'Manual', 'Recolección a mano')",
        "INSERT INTO planta (id, especie, nombre_cientifico, variedad) VALUES (10, 'Mara', 'Swietenia macrophylla', 'Sin especificar')",
    ];
    for sql in statements {
        sqlx::query(sql).execute(db).await.expect("Should seed database");
    }
}

/// A valid collection date a few days back
pub fn recent_date() -> NaiveDate {
    Local::now().date_naive() - Duration::days(3)
}

/// Form fields of a valid request for the existing plant 10
pub fn valid_fields(fecha: NaiveDate) -> Vec<(String, String)> {
    [
        ("fecha", fecha.format("%Y-%m-%d").to_string()),
        ("nombre_comercial", "Mara".to_string()),
        ("cantidad", "2.5".to_string()),
        ("unidad", "kg".to_string()),
        ("tipo_material", "SEMILLA".to_string()),
        ("especie_nueva", "false".to_string()),
        ("planta_id", "10".to_string()),
        ("metodo_id", "1".to_string()),
        ("vivero_id", "1".to_string()),
        ("ubicacion[pais_id]", "1".to_string()),
        ("ubicacion[division_id]", "2".to_string()),
        ("ubicacion[nombre]", "Bosque El Chapare".to_string()),
        ("ubicacion[latitud]", "-16.5833".to_string()),
        ("ubicacion[longitud]", "-68.15".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Replace (or add) one field
pub fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    fields.retain(|(k, _)| k != name);
    fields.push((name.to_string(), value.to_string()));
}

pub fn remove_field(fields: &mut Vec<(String, String)>, name: &str) {
    fields.retain(|(k, _)| k != name);
}

/// Minimal JPEG-looking payload
pub fn jpeg(size: usize) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.resize(size.max(4), 0x42);
    bytes
}

/// multipart/form-data body builder
pub struct MultipartBody {
    boundary: String,
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "----ftr-test-boundary-7MA4YWxkTrZu0gW".to_string(),
            buf: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.buf.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn fields(mut self, fields: &[(String, String)]) -> Self {
        for (name, value) in fields {
            self = self.text(name, value);
        }
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.buf.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                name, file_name, content_type
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    /// Build a POST request carrying this body
    pub fn into_request(mut self, uri: &str, auth_id: Option<&str>) -> Request<Body> {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        let mut builder = Request::builder().method("POST").uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", self.boundary),
        );
        if let Some(auth_id) = auth_id {
            builder = builder.header("x-auth-id", auth_id);
        }
        builder.body(Body::from(self.buf)).unwrap()
    }
}

/// Valid creation request with the given photos
pub fn create_request(auth_id: Option<&str>, fields: &[(String, String)], photos: usize) -> Request<Body> {
    let mut body = MultipartBody::new().fields(fields);
    for i in 0..photos {
        body = body.file("fotos", &format!("foto_{}.jpg", i), "image/jpeg", &jpeg(1024));
    }
    body.into_request("/api/recolecciones", auth_id)
}

pub fn get_request(uri: &str, auth_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(auth_id) = auth_id {
        builder = builder.header("x-auth-id", auth_id);
    }
    builder.body(Body::empty()).unwrap()
}

/// Extract JSON body from response
pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

pub async fn count(db: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db)
        .await
        .unwrap()
}
