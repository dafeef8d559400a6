//! Catalog enums shared between the database layer and the HTTP API
//!
//! All values are persisted as their upper-case wire names (e.g. `SEMILLA`).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! catalog_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire/database representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            /// Parse the wire representation (exact, upper-case)
            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Wire names joined for validation messages
            pub fn wire_names() -> String {
                let names: Vec<&str> = Self::ALL.iter().map(|v| v.as_str()).collect();
                match names.split_last() {
                    Some((last, rest)) if !rest.is_empty() => {
                        format!("{} o {}", rest.join(", "), last)
                    }
                    _ => names.join(""),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

catalog_enum! {
    /// Kind of plant material gathered in a collection
    TipoMaterial {
        Semilla => "SEMILLA",
        Estaca => "ESTACA",
        Plantula => "PLANTULA",
        Injerto => "INJERTO",
    }
}

catalog_enum! {
    /// Storage/usage state of collected material
    EstadoRecoleccion {
        Almacenado => "ALMACENADO",
        EnProceso => "EN_PROCESO",
        Utilizado => "UTILIZADO",
        Descartado => "DESCARTADO",
    }
}

impl Default for EstadoRecoleccion {
    fn default() -> Self {
        EstadoRecoleccion::Almacenado
    }
}

catalog_enum! {
    /// Origin of a plant species
    FuentePlanta {
        Nativa => "NATIVA",
        Introducida => "INTRODUCIDA",
        Endemica => "ENDEMICA",
    }
}

catalog_enum! {
    /// How a location's coordinates were captured
    FuenteUbicacion {
        GpsMovil => "GPS_MOVIL",
        Mapa => "MAPA",
        Manual => "MANUAL",
        Legacy => "LEGACY",
    }
}

catalog_enum! {
    /// User role
    Rol {
        Admin => "ADMIN",
        Tecnico => "TECNICO",
        General => "GENERAL",
    }
}

catalog_enum! {
    /// Progress of a collection through metadata publishing and minting
    EstadoAnclaje {
        Pendiente => "PENDIENTE",
        Publicado => "PUBLICADO",
        Anclado => "ANCLADO",
        Fallido => "FALLIDO",
    }
}

impl EstadoAnclaje {
    /// Terminal states are never picked up again
    pub fn is_terminal(&self) -> bool {
        matches!(self, EstadoAnclaje::Anclado | EstadoAnclaje::Fallido)
    }
}

impl Rol {
    /// Only administrators and field technicians register collections
    pub fn can_create_collections(&self) -> bool {
        matches!(self, Rol::Admin | Rol::Tecnico)
    }
}
