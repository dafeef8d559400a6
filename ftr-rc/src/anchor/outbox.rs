//! Anchoring outbox
//!
//! Every committed collection owns one `anclaje_pendiente` row. The row moves
//! PENDIENTE -> PUBLICADO (metadata pinned) -> ANCLADO (token minted and
//! written back onto the collection). A failed stage keeps its state, bumps
//! `intentos` and is rescheduled with exponential backoff; once
//! `max_attempts` is reached the row becomes FALLIDO.
//!
//! The `safeMint` hash is stored on the row as soon as the chain accepts the
//! transaction. A row holding a hash is only ever confirmed, never minted
//! again.
//!
//! The request path makes one inline attempt right after commit. The worker
//! spawned by [`spawn_worker`] picks up whatever is due afterwards.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use ftr_common::db::AnclajePendiente;
use ftr_common::types::EstadoAnclaje;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::chain::{explorer_url, ChainClient};
use super::metadata::{build_metadata, metadata_file_name};
use super::pinata::PinningService;
use crate::reader::find_detalle;

/// Upper bound for a single backoff delay
const MAX_BACKOFF_MS: i64 = 24 * 60 * 60 * 1000;

/// Rows fetched per worker tick
const BATCH_SIZE: i64 = 20;

/// Insert the outbox row for a new collection (inside the write transaction)
pub async fn enqueue(
    conn: &mut SqliteConnection,
    recoleccion_id: i64,
    proximo_intento: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO anclaje_pendiente (recoleccion_id, estado, intentos, proximo_intento) VALUES (?, ?, 0, ?)",
    )
    .bind(recoleccion_id)
    .bind(EstadoAnclaje::Pendiente.as_str())
    .bind(proximo_intento)
    .execute(conn)
    .await?;
    Ok(())
}

/// Load the outbox row of a collection
pub async fn load_entry(
    pool: &SqlitePool,
    recoleccion_id: i64,
) -> Result<Option<AnclajePendiente>, sqlx::Error> {
    sqlx::query_as::<_, AnclajePendiente>(
        r#"
        SELECT recoleccion_id, estado, intentos, metadata_url, mint_tx_hash, ultimo_error, proximo_intento
        FROM anclaje_pendiente
        WHERE recoleccion_id = ?
        "#,
    )
    .bind(recoleccion_id)
    .fetch_optional(pool)
    .await
}

/// Delay before retry number `intentos` (1-based)
pub fn backoff_delay_ms(base_ms: i64, intentos: i64) -> i64 {
    let exponent = (intentos.max(1) - 1).min(30) as u32;
    base_ms
        .saturating_mul(2i64.saturating_pow(exponent))
        .min(MAX_BACKOFF_MS)
}

/// Retry policy and fixed anchoring parameters
#[derive(Debug, Clone)]
pub struct AnchorSettings {
    /// Address receiving every minted token
    pub recipient: String,
    pub explorer_base_url: String,
    pub backoff_base_ms: i64,
    pub max_attempts: i64,
}

impl AnchorSettings {
    pub fn from_config(chain: &ftr_common::config::ChainConfig, anchoring: &ftr_common::config::AnchoringConfig) -> Self {
        Self {
            recipient: chain.recipient.clone(),
            explorer_base_url: chain.explorer_base_url.clone(),
            backoff_base_ms: (anchoring.backoff_base_secs as i64).saturating_mul(1000),
            max_attempts: i64::from(anchoring.max_attempts.max(1)),
        }
    }
}

/// Drives outbox rows through publishing and minting
pub struct AnchorService {
    pinning: Option<Arc<dyn PinningService>>,
    chain: Option<Arc<dyn ChainClient>>,
    settings: AnchorSettings,
    in_flight: Mutex<HashSet<i64>>,
}

/// Removes its id from the in-flight set when dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

impl AnchorService {
    /// Service with both integrations disabled
    pub fn new(settings: AnchorSettings) -> Self {
        Self {
            pinning: None,
            chain: None,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_pinning(mut self, pinning: Arc<dyn PinningService>) -> Self {
        self.pinning = Some(pinning);
        self
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainClient>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn is_active(&self) -> bool {
        self.pinning.is_some() || self.chain.is_some()
    }

    /// Outbox states this service can advance
    fn workable_states(&self) -> Vec<&'static str> {
        let mut states = Vec::new();
        if self.pinning.is_some() {
            states.push(EstadoAnclaje::Pendiente.as_str());
        }
        if self.chain.is_some() {
            states.push(EstadoAnclaje::Publicado.as_str());
        }
        states
    }

    fn claim(&self, id: i64) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().ok()?;
        if set.insert(id) {
            Some(InFlight {
                set: &self.in_flight,
                id,
            })
        } else {
            None
        }
    }

    /// Best-effort attempt; errors are logged and recorded, never returned
    pub async fn attempt(&self, pool: &SqlitePool, recoleccion_id: i64) {
        if !self.is_active() {
            debug!(recoleccion_id, "Anchoring disabled, outbox row left pending");
            return;
        }
        if let Err(e) = self.process(pool, recoleccion_id).await {
            warn!(recoleccion_id, error = %e, "Anchoring attempt failed");
        }
    }

    /// Advance one row as far as the enabled integrations allow
    ///
    /// Returns the resulting state. A failed stage is recorded on the row
    /// before the error is returned.
    pub async fn process(&self, pool: &SqlitePool, recoleccion_id: i64) -> Result<EstadoAnclaje> {
        let Some(_guard) = self.claim(recoleccion_id) else {
            return Err(anyhow!("Recolección {} is already being anchored", recoleccion_id));
        };

        let entry = load_entry(pool, recoleccion_id)
            .await?
            .ok_or_else(|| anyhow!("No outbox row for recolección {}", recoleccion_id))?;
        let mut estado = EstadoAnclaje::parse(&entry.estado)
            .ok_or_else(|| anyhow!("Unknown outbox state '{}'", entry.estado))?;
        let mut metadata_url = entry.metadata_url;

        if estado == EstadoAnclaje::Pendiente {
            let Some(pinning) = self.pinning.as_ref() else {
                return Ok(estado);
            };
            match self.publish(pool, pinning.as_ref(), recoleccion_id).await {
                Ok(url) => {
                    mark_published(pool, recoleccion_id, &url).await?;
                    estado = EstadoAnclaje::Publicado;
                    metadata_url = Some(url);
                }
                Err(e) => {
                    self.record_failure(pool, recoleccion_id, entry.intentos, &e).await?;
                    return Err(e);
                }
            }
        }

        if estado == EstadoAnclaje::Publicado {
            let Some(chain) = self.chain.as_ref() else {
                return Ok(estado);
            };
            let intentos = if entry.estado == EstadoAnclaje::Publicado.as_str() {
                entry.intentos
            } else {
                0
            };
            let result = match metadata_url.as_deref() {
                Some(url) => {
                    self.mint(pool, chain.as_ref(), recoleccion_id, url, entry.mint_tx_hash.as_deref())
                        .await
                }
                None => Err(anyhow!("Published row has no metadata URL")),
            };
            match result {
                Ok(()) => estado = EstadoAnclaje::Anclado,
                Err(e) => {
                    self.record_failure(pool, recoleccion_id, intentos, &e).await?;
                    return Err(e);
                }
            }
        }

        Ok(estado)
    }

    /// Pin the metadata document; returns its public URL
    async fn publish(
        &self,
        pool: &SqlitePool,
        pinning: &dyn PinningService,
        recoleccion_id: i64,
    ) -> Result<String> {
        let detalle = find_detalle(pool, recoleccion_id)
            .await?
            .ok_or_else(|| anyhow!("Recolección {} not found", recoleccion_id))?;

        let metadata = build_metadata(&detalle);
        let content: Value = serde_json::to_value(&metadata).context("Failed to serialize metadata")?;
        let name = metadata_file_name(&detalle.recoleccion.codigo_trazabilidad);

        let document = pinning.pin_json(&content, &name).await?;
        info!(
            recoleccion_id,
            cid = %document.cid,
            url = %document.public_url,
            "Metadata publicada"
        );
        Ok(document.public_url)
    }

    /// Mint the token and write the anchor fields back in one transaction
    ///
    /// With `submitted` set, the earlier transaction is confirmed instead of
    /// sending a new one.
    async fn mint(
        &self,
        pool: &SqlitePool,
        chain: &dyn ChainClient,
        recoleccion_id: i64,
        metadata_url: &str,
        submitted: Option<&str>,
    ) -> Result<()> {
        let tx_hash = match submitted {
            Some(hash) => {
                info!(recoleccion_id, tx_hash = %hash, "Resuming submitted mint");
                hash.to_string()
            }
            None => {
                let hash = chain.submit_mint(&self.settings.recipient, metadata_url).await?;
                record_mint_submitted(pool, recoleccion_id, &hash)
                    .await
                    .with_context(|| format!("Failed to store mint transaction {}", hash))?;
                hash
            }
        };

        let receipt = chain.confirm_mint(&tx_hash).await?;
        let blockchain_url = explorer_url(
            &self.settings.explorer_base_url,
            chain.contract_address(),
            &receipt.token_id,
        );

        let mut tx = pool.begin().await?;
        sqlx::query(
            "UPDATE recoleccion SET blockchain_url = ?, token_id = ?, transaction_hash = ? WHERE id = ?",
        )
        .bind(&blockchain_url)
        .bind(&receipt.token_id)
        .bind(&receipt.transaction_hash)
        .bind(recoleccion_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE anclaje_pendiente
            SET estado = ?, ultimo_error = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE recoleccion_id = ?
            "#,
        )
        .bind(EstadoAnclaje::Anclado.as_str())
        .bind(recoleccion_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            recoleccion_id,
            token_id = %receipt.token_id,
            tx_hash = %receipt.transaction_hash,
            block = ?receipt.block_number,
            url = %blockchain_url,
            "Recolección anclada"
        );
        Ok(())
    }

    async fn record_failure(
        &self,
        pool: &SqlitePool,
        recoleccion_id: i64,
        previous_attempts: i64,
        err: &anyhow::Error,
    ) -> Result<(), sqlx::Error> {
        let intentos = previous_attempts + 1;
        let message = format!("{:#}", err);

        if intentos >= self.settings.max_attempts {
            error!(recoleccion_id, intentos, error = %message, "Anchoring abandoned");
            sqlx::query(
                r#"
                UPDATE anclaje_pendiente
                SET estado = ?, intentos = ?, ultimo_error = ?,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE recoleccion_id = ?
                "#,
            )
            .bind(EstadoAnclaje::Fallido.as_str())
            .bind(intentos)
            .bind(&message)
            .bind(recoleccion_id)
            .execute(pool)
            .await?;
            return Ok(());
        }

        let delay = backoff_delay_ms(self.settings.backoff_base_ms, intentos);
        debug!(recoleccion_id, intentos, delay_ms = delay, "Anchoring rescheduled");
        sqlx::query(
            r#"
            UPDATE anclaje_pendiente
            SET intentos = ?, ultimo_error = ?, proximo_intento = ?,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE recoleccion_id = ?
            "#,
        )
        .bind(intentos)
        .bind(&message)
        .bind(Utc::now().timestamp_millis() + delay)
        .bind(recoleccion_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Process every due row once; returns how many were attempted
    pub async fn run_due(&self, pool: &SqlitePool) -> Result<usize, sqlx::Error> {
        let states = self.workable_states();
        if states.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT recoleccion_id FROM anclaje_pendiente WHERE estado IN ({}) AND proximo_intento <= ? ORDER BY proximo_intento LIMIT ?",
            placeholders
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for state in &states {
            query = query.bind(*state);
        }
        let due: Vec<i64> = query
            .bind(Utc::now().timestamp_millis())
            .bind(BATCH_SIZE)
            .fetch_all(pool)
            .await?;

        for id in &due {
            self.attempt(pool, *id).await;
        }
        Ok(due.len())
    }
}

async fn mark_published(pool: &SqlitePool, recoleccion_id: i64, url: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE anclaje_pendiente
        SET estado = ?, metadata_url = ?, intentos = 0, ultimo_error = NULL,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        WHERE recoleccion_id = ?
        "#,
    )
    .bind(EstadoAnclaje::Publicado.as_str())
    .bind(url)
    .bind(recoleccion_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn record_mint_submitted(
    pool: &SqlitePool,
    recoleccion_id: i64,
    tx_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE anclaje_pendiente
        SET mint_tx_hash = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        WHERE recoleccion_id = ?
        "#,
    )
    .bind(tx_hash)
    .bind(recoleccion_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Background retry loop
pub fn spawn_worker(
    pool: SqlitePool,
    service: Arc<AnchorService>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = poll_interval.as_secs(), "Anchoring worker started");
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.run_due(&pool).await {
                Ok(0) => {}
                Ok(n) => debug!(count = n, "Anchoring worker pass complete"),
                Err(e) => error!(error = %e, "Anchoring worker query failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(30_000, 1), 30_000);
        assert_eq!(backoff_delay_ms(30_000, 2), 60_000);
        assert_eq!(backoff_delay_ms(30_000, 4), 240_000);
        assert_eq!(backoff_delay_ms(30_000, 40), MAX_BACKOFF_MS);
        assert_eq!(backoff_delay_ms(30_000, 0), 30_000);
    }

    #[test]
    fn test_workable_states_follow_integrations() {
        let settings = AnchorSettings {
            recipient: "0x0".to_string(),
            explorer_base_url: "https://explorer".to_string(),
            backoff_base_ms: 1000,
            max_attempts: 3,
        };
        let service = AnchorService::new(settings);
        assert!(!service.is_active());
        assert!(service.workable_states().is_empty());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let settings = AnchorSettings {
            recipient: "0x0".to_string(),
            explorer_base_url: "https://explorer".to_string(),
            backoff_base_ms: 1000,
            max_attempts: 3,
        };
        let service = AnchorService::new(settings);
        let first = service.claim(7);
        assert!(first.is_some());
        assert!(service.claim(7).is_none());
        drop(first);
        assert!(service.claim(7).is_some());
    }

    #[tokio::test]
    async fn test_enqueue_and_load() {
        let pool = ftr_common::db::init_memory_database().await.unwrap();
        sqlx::query("INSERT INTO usuario (id, auth_id, nombre, rol) VALUES (1, 'a', 'Ana', 'ADMIN')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO metodo_recoleccion (id, nombre) VALUES (1, 'Manual')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO ubicacion (id, latitud, longitud) VALUES (1, -16.5, -68.1)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO recoleccion (id, fecha, cantidad, unidad, tipo_material, usuario_id, ubicacion_id, metodo_id, codigo_trazabilidad) VALUES (1, '2024-01-20', 1.0, 'kg', 'SEMILLA', 1, 1, 1, 'REC-2024-001')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        enqueue(&mut conn, 1, 1234).await.unwrap();
        drop(conn);

        let entry = load_entry(&pool, 1).await.unwrap().unwrap();
        assert_eq!(entry.estado, "PENDIENTE");
        assert_eq!(entry.intentos, 0);
        assert_eq!(entry.proximo_intento, 1234);
        assert!(entry.metadata_url.is_none());
        assert!(entry.mint_tx_hash.is_none());

        record_mint_submitted(&pool, 1, "0xabc").await.unwrap();
        let entry = load_entry(&pool, 1).await.unwrap().unwrap();
        assert_eq!(entry.mint_tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(entry.estado, "PENDIENTE");
    }
}
