//! NFT metadata document for a collection

use chrono::FixedOffset;
use serde::Serialize;

use crate::reader::RecoleccionDetalle;

/// Offset used for the human-readable collection time (America/La_Paz)
const LOCAL_OFFSET_SECS: i32 = -4 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NftMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<NftAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: String,
}

impl NftAttribute {
    fn new(trait_type: &str, value: impl Into<String>) -> Self {
        Self {
            trait_type: trait_type.to_string(),
            value: value.into(),
        }
    }
}

/// File name the metadata is pinned under
pub fn metadata_file_name(codigo_trazabilidad: &str) -> String {
    format!("{}.json", codigo_trazabilidad)
}

/// Build the metadata document from a joined collection
pub fn build_metadata(detalle: &RecoleccionDetalle) -> NftMetadata {
    let r = &detalle.recoleccion;

    let usuario = detalle
        .usuario
        .as_ref()
        .map(|u| u.nombre.clone())
        .unwrap_or_default();

    let especie = detalle
        .planta
        .as_ref()
        .map(|p| p.especie.clone())
        .or_else(|| r.nombre_comercial.clone())
        .unwrap_or_default();

    let foto_total = detalle
        .fotos
        .iter()
        .find(|f| f.url.contains("total"))
        .or_else(|| detalle.fotos.first());
    let foto_lugar = detalle
        .fotos
        .iter()
        .find(|f| f.url.contains("lugar"))
        .or_else(|| detalle.fotos.get(1));

    let fecha = r.fecha.format("%Y-%m-%d").to_string();
    let hora = match FixedOffset::east_opt(LOCAL_OFFSET_SECS) {
        Some(offset) => r.created_at.with_timezone(&offset).format("%H:%M").to_string(),
        None => r.created_at.format("%H:%M").to_string(),
    };

    let ubicacion = describe_location(detalle);
    let ubicacion_completa = match detalle
        .ubicacion
        .as_ref()
        .and_then(|u| u.ubicacion.referencia.as_deref())
    {
        Some(referencia) if !ubicacion.is_empty() => {
            format!("{} Referencia: {}", ubicacion, referencia)
        }
        Some(referencia) => format!("Referencia: {}", referencia),
        None => ubicacion.clone(),
    };

    let coordenadas = detalle
        .ubicacion
        .as_ref()
        .map(|u| format!("{}, {}", u.ubicacion.latitud, u.ubicacion.longitud))
        .unwrap_or_default();

    let cantidad = format!("{} {}", r.cantidad, r.unidad);

    let description = format!(
        "Recolección de {} de {} realizada por {} el {} a las {} en {}. Cantidad: {}",
        r.tipo_material.to_lowercase(),
        especie,
        usuario,
        fecha,
        hora,
        ubicacion,
        cantidad
    );

    let mut attributes = vec![
        NftAttribute::new("ID", r.codigo_trazabilidad.clone()),
        NftAttribute::new("Usuario", usuario),
        NftAttribute::new("Tipo", "Recoleccion"),
        NftAttribute::new("Fecha", fecha),
        NftAttribute::new("Hora", hora),
        NftAttribute::new("Especie", especie.clone()),
        NftAttribute::new("Tipo de material", r.tipo_material.clone()),
        NftAttribute::new("Cantidad", cantidad),
        NftAttribute::new(
            "Metodo",
            detalle
                .metodo
                .as_ref()
                .map(|m| m.nombre.clone())
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        NftAttribute::new("Estado", r.estado.clone()),
        NftAttribute::new("Ubicacion", ubicacion_completa),
        NftAttribute::new("Coordenadas", coordenadas),
    ];
    if let Some(foto) = foto_lugar {
        attributes.push(NftAttribute::new("Foto Lugar", foto.url.clone()));
    }
    if let Some(foto) = foto_total {
        attributes.push(NftAttribute::new("Foto Total", foto.url.clone()));
    }

    NftMetadata {
        name: format!("{} - Recolección de {}", r.codigo_trazabilidad, especie),
        description,
        image: foto_total.map(|f| f.url.clone()).unwrap_or_default(),
        attributes,
    }
}

/// Site name, divisions (most specific first) and country, comma separated
fn describe_location(detalle: &RecoleccionDetalle) -> String {
    let Some(ubicacion) = detalle.ubicacion.as_ref() else {
        return String::new();
    };

    let mut parts: Vec<String> = Vec::new();
    if let Some(nombre) = &ubicacion.ubicacion.nombre {
        parts.push(nombre.clone());
    }
    if let Some(division) = &ubicacion.division {
        parts.extend(division.ruta.iter().rev().map(|t| t.nombre.clone()));
    }
    if let Some(pais) = &ubicacion.pais {
        parts.push(pais.nombre.clone());
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join(", ")
}
