//! Collection intake
//!
//! normalize -> resolve caller -> authorize -> verify references ->
//! transactional write -> inline anchoring attempt -> read back.

pub mod form;
pub mod photos;
pub mod resolver;
pub mod trace_code;
pub mod workflow;
pub mod writer;

pub use form::{nest_fields, normalize, CreateRecoleccion, Especie, NuevaPlanta, NuevaUbicacion};
pub use photos::PhotoUpload;
pub use workflow::create_recoleccion;
