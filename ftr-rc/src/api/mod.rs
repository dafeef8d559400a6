//! HTTP API handlers for ftr-rc

pub mod health;
pub mod recolecciones;

pub use health::health_routes;
pub use recolecciones::{recoleccion_routes, AUTH_ID_HEADER};
