//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Usuario {
    pub id: i64,
    pub auth_id: String,
    pub nombre: String,
    pub username: Option<String>,
    pub correo: Option<String>,
    pub rol: String,
}

/// User fields exposed in collection views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UsuarioResumen {
    pub id: i64,
    pub nombre: String,
    pub username: Option<String>,
    pub correo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Pais {
    pub id: i64,
    pub codigo_iso2: Option<String>,
    pub nombre: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DivisionAdministrativa {
    pub id: i64,
    pub pais_id: i64,
    pub padre_id: Option<i64>,
    pub tipo: String,
    pub nombre: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Ubicacion {
    pub id: i64,
    pub pais_id: Option<i64>,
    pub division_id: Option<i64>,
    pub nombre: Option<String>,
    pub referencia: Option<String>,
    pub latitud: f64,
    pub longitud: f64,
    pub precision_m: Option<f64>,
    pub fuente: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Nursery fields exposed in collection views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ViveroResumen {
    pub id: i64,
    pub codigo: String,
    pub nombre: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MetodoRecoleccion {
    pub id: i64,
    pub nombre: String,
    pub descripcion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Planta {
    pub id: i64,
    pub especie: String,
    pub nombre_cientifico: String,
    pub variedad: String,
    pub tipo_planta: Option<String>,
    pub tipo_planta_otro: Option<String>,
    pub fuente: Option<String>,
    pub imagen_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A collection event ("recolección")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Recoleccion {
    pub id: i64,
    pub fecha: NaiveDate,
    pub nombre_cientifico: Option<String>,
    pub nombre_comercial: Option<String>,
    pub cantidad: f64,
    pub unidad: String,
    pub tipo_material: String,
    pub estado: String,
    pub especie_nueva: bool,
    pub observaciones: Option<String>,
    pub usuario_id: i64,
    pub ubicacion_id: i64,
    pub vivero_id: Option<i64>,
    pub metodo_id: i64,
    pub planta_id: Option<i64>,
    pub codigo_trazabilidad: String,
    pub created_at: DateTime<Utc>,
    pub blockchain_url: Option<String>,
    pub token_id: Option<String>,
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RecoleccionFoto {
    pub id: i64,
    pub recoleccion_id: i64,
    pub url: String,
    pub peso_bytes: i64,
    pub formato: String,
    pub created_at: DateTime<Utc>,
}

/// Outbox row driving metadata publishing and chain anchoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AnclajePendiente {
    pub recoleccion_id: i64,
    pub estado: String,
    pub intentos: i64,
    pub metadata_url: Option<String>,
    /// Hash of the submitted `safeMint`, stored before its receipt is awaited
    pub mint_tx_hash: Option<String>,
    pub ultimo_error: Option<String>,
    /// Unix epoch milliseconds
    pub proximo_intento: i64,
}
