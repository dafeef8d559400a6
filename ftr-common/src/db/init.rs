//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the
//! services need. All statements are idempotent.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas set on the options apply to every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Single connection that never expires: an in-memory SQLite database lives
/// exactly as long as its connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_usuario_table(pool).await?;
    create_geography_tables(pool).await?;
    create_catalog_tables(pool).await?;
    create_recoleccion_tables(pool).await?;
    create_anchoring_tables(pool).await?;

    info!("Database schema ready");
    Ok(())
}

async fn create_usuario_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usuario (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            auth_id TEXT NOT NULL UNIQUE,
            nombre TEXT NOT NULL,
            username TEXT,
            correo TEXT,
            rol TEXT NOT NULL DEFAULT 'GENERAL',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_geography_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pais (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo_iso2 TEXT UNIQUE,
            nombre TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Administrative divisions form a tree per country (department > province > ...)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS division_administrativa (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pais_id INTEGER NOT NULL REFERENCES pais(id),
            padre_id INTEGER REFERENCES division_administrativa(id),
            tipo TEXT NOT NULL,
            nombre TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ubicacion (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pais_id INTEGER REFERENCES pais(id),
            division_id INTEGER REFERENCES division_administrativa(id),
            nombre TEXT,
            referencia TEXT,
            latitud REAL NOT NULL,
            longitud REAL NOT NULL,
            precision_m REAL,
            fuente TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vivero (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            codigo TEXT NOT NULL UNIQUE,
            nombre TEXT NOT NULL,
            ubicacion_id INTEGER REFERENCES ubicacion(id),
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metodo_recoleccion (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nombre TEXT NOT NULL UNIQUE,
            descripcion TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS planta (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            especie TEXT NOT NULL,
            nombre_cientifico TEXT NOT NULL,
            variedad TEXT NOT NULL DEFAULT 'Sin especificar',
            tipo_planta TEXT,
            tipo_planta_otro TEXT,
            fuente TEXT,
            imagen_url TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recoleccion_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recoleccion (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fecha TEXT NOT NULL,
            nombre_cientifico TEXT,
            nombre_comercial TEXT,
            cantidad REAL NOT NULL CHECK (cantidad > 0),
            unidad TEXT NOT NULL,
            tipo_material TEXT NOT NULL,
            estado TEXT NOT NULL DEFAULT 'ALMACENADO',
            especie_nueva INTEGER NOT NULL DEFAULT 0,
            observaciones TEXT,
            usuario_id INTEGER NOT NULL REFERENCES usuario(id),
            ubicacion_id INTEGER NOT NULL UNIQUE REFERENCES ubicacion(id),
            vivero_id INTEGER REFERENCES vivero(id),
            metodo_id INTEGER NOT NULL REFERENCES metodo_recoleccion(id),
            planta_id INTEGER REFERENCES planta(id),
            codigo_trazabilidad TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            blockchain_url TEXT,
            token_id TEXT,
            transaction_hash TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recoleccion_fecha ON recoleccion(fecha)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recoleccion_usuario ON recoleccion(usuario_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recoleccion_vivero ON recoleccion(vivero_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recoleccion_foto (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recoleccion_id INTEGER NOT NULL REFERENCES recoleccion(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            peso_bytes INTEGER NOT NULL,
            formato TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per calendar year; `ultimo` is the last sequence handed out
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contador_trazabilidad (
            anio INTEGER PRIMARY KEY,
            ultimo INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_anchoring_tables(pool: &SqlitePool) -> Result<()> {
    // Outbox for metadata publishing + NFT minting.
    // proximo_intento is unix epoch milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS anclaje_pendiente (
            recoleccion_id INTEGER PRIMARY KEY REFERENCES recoleccion(id) ON DELETE CASCADE,
            estado TEXT NOT NULL DEFAULT 'PENDIENTE',
            intentos INTEGER NOT NULL DEFAULT 0,
            metadata_url TEXT,
            mint_tx_hash TEXT,
            ultimo_error TEXT,
            proximo_intento INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before mint_tx_hash existed
    add_missing_column(pool, "anclaje_pendiente", "mint_tx_hash", "TEXT").await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_anclaje_pendiente_due ON anclaje_pendiente(estado, proximo_intento)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Add a nullable column via ALTER TABLE ADD COLUMN if the table lacks it
async fn add_missing_column(pool: &SqlitePool, table: &str, column: &str, sql_type: &str) -> Result<()> {
    let present: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await?;

    if present == 0 {
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type))
            .execute(pool)
            .await?;
        info!("Added column {}.{}", table, column);
    }
    Ok(())
}
