//! Input normalization for collection creation
//!
//! Multipart bodies arrive as flat text fields with bracket or dot notation
//! (`ubicacion[latitud]`, `nueva_planta.especie`). They are nested into a JSON
//! object, numeric and boolean strings are coerced, and the result is
//! validated into a [`CreateRecoleccion`]. Every violation is collected and
//! reported in a single validation error.

use chrono::{DateTime, Duration, NaiveDate};
use ftr_common::types::{EstadoRecoleccion, FuentePlanta, FuenteUbicacion, TipoMaterial};
use serde_json::{Map, Value};

use super::photos::{validate_photos, PhotoUpload};
use crate::error::{ApiError, ApiResult};

/// Oldest accepted collection date, in days before today
pub const MAX_AGE_DAYS: i64 = 45;

pub const MAX_OBSERVACIONES_CHARS: usize = 1000;

/// Variety stored for new plants submitted without one
pub const VARIEDAD_POR_DEFECTO: &str = "Sin especificar";

/// Flat location descriptors from the previous location contract
const LEGACY_UBICACION_FIELDS: &[&str] = &[
    "pais",
    "departamento",
    "provincia",
    "municipio",
    "comunidad",
    "zona",
];

const RECOLECCION_FIELDS: &[&str] = &[
    "fecha",
    "nombre_cientifico",
    "nombre_comercial",
    "cantidad",
    "unidad",
    "tipo_material",
    "estado",
    "especie_nueva",
    "observaciones",
    "ubicacion",
    "vivero_id",
    "metodo_id",
    "planta_id",
    "nueva_planta",
];

const UBICACION_FIELDS: &[&str] = &[
    "pais_id",
    "division_id",
    "nombre",
    "referencia",
    "precision_m",
    "fuente",
    "latitud",
    "longitud",
];

const NUEVA_PLANTA_FIELDS: &[&str] = &[
    "especie",
    "nombre_cientifico",
    "variedad",
    "tipo_planta",
    "tipo_planta_otro",
    "fuente",
];

/// Location created together with the collection
#[derive(Debug, Clone, PartialEq)]
pub struct NuevaUbicacion {
    pub pais_id: Option<i64>,
    pub division_id: Option<i64>,
    pub nombre: Option<String>,
    pub referencia: Option<String>,
    pub latitud: f64,
    pub longitud: f64,
    pub precision_m: Option<f64>,
    pub fuente: Option<FuenteUbicacion>,
}

/// Plant catalog entry created inline for a new species
#[derive(Debug, Clone, PartialEq)]
pub struct NuevaPlanta {
    pub especie: String,
    pub nombre_cientifico: String,
    pub variedad: String,
    pub tipo_planta: Option<String>,
    pub tipo_planta_otro: Option<String>,
    pub fuente: Option<FuentePlanta>,
}

/// Which plant the collection refers to
#[derive(Debug, Clone, PartialEq)]
pub enum Especie {
    /// Existing catalog plant (`especie_nueva = false`)
    Existente(i64),
    /// New species to create (`especie_nueva = true`)
    Nueva(NuevaPlanta),
}

/// Validated collection creation request
#[derive(Debug, Clone)]
pub struct CreateRecoleccion {
    pub fecha: NaiveDate,
    pub nombre_cientifico: Option<String>,
    pub nombre_comercial: Option<String>,
    pub cantidad: f64,
    pub unidad: String,
    pub tipo_material: TipoMaterial,
    pub estado: EstadoRecoleccion,
    pub observaciones: Option<String>,
    pub ubicacion: NuevaUbicacion,
    pub vivero_id: Option<i64>,
    pub metodo_id: i64,
    pub especie: Especie,
    pub fotos: Vec<PhotoUpload>,
}

impl CreateRecoleccion {
    pub fn especie_nueva(&self) -> bool {
        matches!(self.especie, Especie::Nueva(_))
    }

    /// Scientific name stored on the record; a new plant's name wins
    pub fn nombre_cientifico_registro(&self) -> Option<&str> {
        match &self.especie {
            Especie::Nueva(planta) => Some(planta.nombre_cientifico.as_str()),
            Especie::Existente(_) => self.nombre_cientifico.as_deref(),
        }
    }
}

/// Nest flat form fields into an object; later duplicates win
pub fn nest_fields<I, K, V>(fields: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut root = Map::new();
    for (key, value) in fields {
        let path = key_segments(key.as_ref());
        insert_path(&mut root, &path, Value::String(value.into()));
    }
    root
}

fn key_segments(key: &str) -> Vec<&str> {
    key.split(|c: char| c == '[' || c == ']' || c == '.')
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Validate the nested payload and photos into a creation request
///
/// Legacy flat location fields abort immediately; every other violation is
/// collected into one `Validación fallida: ...` error.
pub fn normalize(
    fields: Map<String, Value>,
    fotos: Vec<PhotoUpload>,
    today: NaiveDate,
) -> ApiResult<CreateRecoleccion> {
    if let Some(Value::Object(ubicacion)) = fields.get("ubicacion") {
        assert_no_legacy_fields(ubicacion)?;
    }

    let mut check = Checker::default();

    check.unknown_fields(&fields, RECOLECCION_FIELDS, "");

    let fecha = check.fecha(&fields, today);
    let nombre_cientifico = text(&fields, "nombre_cientifico");
    let nombre_comercial = text(&fields, "nombre_comercial");
    let cantidad = check.cantidad(&fields);
    let unidad = check.required_text(&fields, "unidad", "La unidad es requerida");
    let tipo_material = check.tipo_material(&fields);
    let estado = check.estado(&fields);
    let especie_nueva = check.especie_nueva(&fields);
    let observaciones = check.observaciones(&fields);
    let ubicacion = check.ubicacion(&fields);
    let vivero_id = check.optional_id(&fields, "vivero_id");
    let metodo_id = check.required_id(
        &fields,
        "metodo_id",
        "El método de recolección es requerido",
    );
    let especie = match especie_nueva {
        Some(true) => check.nueva_planta(&fields).map(Especie::Nueva),
        Some(false) => check
            .required_id(
                &fields,
                "planta_id",
                "planta_id es requerido cuando especie_nueva = false",
            )
            .map(Especie::Existente),
        None => None,
    };

    check.messages.extend(validate_photos(&fotos));

    if !check.messages.is_empty() {
        return Err(ApiError::validation(check.messages));
    }

    match (fecha, cantidad, unidad, tipo_material, ubicacion, metodo_id, especie) {
        (
            Some(fecha),
            Some(cantidad),
            Some(unidad),
            Some(tipo_material),
            Some(ubicacion),
            Some(metodo_id),
            Some(especie),
        ) => Ok(CreateRecoleccion {
            fecha,
            nombre_cientifico,
            nombre_comercial,
            cantidad,
            unidad,
            tipo_material,
            estado: estado.unwrap_or_default(),
            observaciones,
            ubicacion,
            vivero_id,
            metodo_id,
            especie,
            fotos,
        }),
        _ => Err(ApiError::validation(["Solicitud incompleta"])),
    }
}

fn assert_no_legacy_fields(ubicacion: &Map<String, Value>) -> ApiResult<()> {
    match LEGACY_UBICACION_FIELDS
        .iter()
        .find(|field| ubicacion.contains_key(**field))
    {
        Some(field) => Err(ApiError::Validation(format!(
            "El campo legacy ubicacion.{} ya no se soporta. Usa pais_id/division_id/nombre/referencia/latitud/longitud/precision_m/fuente.",
            field
        ))),
        None => Ok(()),
    }
}

/// Numeric form value after coercion
enum Numeric {
    Missing,
    Invalid,
    Value(f64),
}

fn numeric(map: &Map<String, Value>, key: &str) -> Numeric {
    match map.get(key) {
        None | Some(Value::Null) => Numeric::Missing,
        Some(Value::Number(n)) => n.as_f64().map(Numeric::Value).unwrap_or(Numeric::Invalid),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Numeric::Missing;
            }
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Numeric::Value(v),
                _ => Numeric::Invalid,
            }
        }
        Some(_) => Numeric::Invalid,
    }
}

/// Non-empty trimmed text value
fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn positive_integer(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= 1.0 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn parse_fecha(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

#[derive(Default)]
struct Checker {
    messages: Vec<String>,
}

impl Checker {
    fn fail(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    fn unknown_fields(&mut self, map: &Map<String, Value>, allowed: &[&str], prefix: &str) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.fail(format!("La propiedad {}{} no está permitida", prefix, key));
            }
        }
    }

    fn required_text(&mut self, map: &Map<String, Value>, key: &str, message: &str) -> Option<String> {
        let value = text(map, key);
        if value.is_none() {
            self.fail(message);
        }
        value
    }

    fn fecha(&mut self, map: &Map<String, Value>, today: NaiveDate) -> Option<NaiveDate> {
        let raw = match text(map, "fecha") {
            Some(raw) => raw,
            None => {
                self.fail("La fecha es requerida");
                return None;
            }
        };
        let fecha = match parse_fecha(&raw) {
            Some(fecha) => fecha,
            None => {
                self.fail("La fecha debe ser válida");
                return None;
            }
        };

        if fecha > today {
            self.fail("La fecha no puede ser futura");
            return None;
        }
        if fecha < today - Duration::days(MAX_AGE_DAYS) {
            self.fail(format!(
                "La fecha no puede ser mayor a {} días atrás",
                MAX_AGE_DAYS
            ));
            return None;
        }
        Some(fecha)
    }

    fn cantidad(&mut self, map: &Map<String, Value>) -> Option<f64> {
        match numeric(map, "cantidad") {
            Numeric::Missing => self.fail("La cantidad es requerida"),
            Numeric::Invalid => self.fail("La cantidad debe ser un número"),
            Numeric::Value(v) if v <= 0.0 => self.fail("La cantidad debe ser mayor a 0"),
            Numeric::Value(v) => return Some(v),
        }
        None
    }

    fn tipo_material(&mut self, map: &Map<String, Value>) -> Option<TipoMaterial> {
        let raw = match text(map, "tipo_material") {
            Some(raw) => raw,
            None => {
                self.fail("El tipo de material es requerido");
                return None;
            }
        };
        let parsed = TipoMaterial::parse(&raw);
        if parsed.is_none() {
            self.fail(format!(
                "El tipo de material debe ser {}",
                TipoMaterial::wire_names()
            ));
        }
        parsed
    }

    fn estado(&mut self, map: &Map<String, Value>) -> Option<EstadoRecoleccion> {
        let raw = text(map, "estado")?;
        let parsed = EstadoRecoleccion::parse(&raw);
        if parsed.is_none() {
            self.fail(format!(
                "El estado debe ser {}",
                EstadoRecoleccion::wire_names()
            ));
        }
        parsed
    }

    fn especie_nueva(&mut self, map: &Map<String, Value>) -> Option<bool> {
        match map.get("especie_nueva") {
            None | Some(Value::Null) => {
                self.fail("El campo especie_nueva es requerido");
                None
            }
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::String(s)) => Some(s.trim() == "true"),
            Some(_) => Some(false),
        }
    }

    fn observaciones(&mut self, map: &Map<String, Value>) -> Option<String> {
        let value = text(map, "observaciones")?;
        if value.chars().count() > MAX_OBSERVACIONES_CHARS {
            self.fail(format!(
                "Las observaciones no pueden superar {} caracteres",
                MAX_OBSERVACIONES_CHARS
            ));
        }
        Some(value)
    }

    fn optional_id(&mut self, map: &Map<String, Value>, key: &str) -> Option<i64> {
        match numeric(map, key) {
            Numeric::Missing => None,
            Numeric::Invalid => {
                self.fail(format!("{} debe ser un número", key));
                None
            }
            Numeric::Value(v) => {
                let id = positive_integer(v);
                if id.is_none() {
                    self.fail(format!("{} debe ser un entero mayor a 0", key));
                }
                id
            }
        }
    }

    fn required_id(&mut self, map: &Map<String, Value>, key: &str, message: &str) -> Option<i64> {
        if matches!(numeric(map, key), Numeric::Missing) {
            self.fail(message);
            return None;
        }
        self.optional_id(map, key)
    }

    fn coordinate(&mut self, map: &Map<String, Value>, key: &str, label: &str, bound: f64) -> Option<f64> {
        match numeric(map, key) {
            Numeric::Missing => self.fail(format!("La {} es requerida", label)),
            Numeric::Invalid => self.fail(format!("La {} debe ser un número", label)),
            Numeric::Value(v) if !(-bound..=bound).contains(&v) => self.fail(format!(
                "La {} debe estar entre -{} y {}",
                label, bound, bound
            )),
            Numeric::Value(v) => return Some(v),
        }
        None
    }

    fn ubicacion(&mut self, fields: &Map<String, Value>) -> Option<NuevaUbicacion> {
        let map = match fields.get("ubicacion") {
            Some(Value::Object(map)) => map,
            _ => {
                self.fail("La ubicación es requerida");
                return None;
            }
        };

        self.unknown_fields(map, UBICACION_FIELDS, "ubicacion.");

        let pais_id = self.optional_id(map, "pais_id");
        let division_id = self.optional_id(map, "division_id");

        let precision_m = match numeric(map, "precision_m") {
            Numeric::Missing => None,
            Numeric::Invalid => {
                self.fail("precision_m debe ser un número");
                None
            }
            Numeric::Value(v) if v <= 0.0 => {
                self.fail("precision_m debe ser mayor a 0");
                None
            }
            Numeric::Value(v) => Some(v),
        };

        let fuente = match text(map, "fuente") {
            None => None,
            Some(raw) => {
                let parsed = FuenteUbicacion::parse(&raw);
                if parsed.is_none() {
                    self.fail(format!("fuente debe ser {}", FuenteUbicacion::wire_names()));
                }
                parsed
            }
        };

        let latitud = self.coordinate(map, "latitud", "latitud", 90.0);
        let longitud = self.coordinate(map, "longitud", "longitud", 180.0);

        Some(NuevaUbicacion {
            pais_id,
            division_id,
            nombre: text(map, "nombre"),
            referencia: text(map, "referencia"),
            latitud: latitud?,
            longitud: longitud?,
            precision_m,
            fuente,
        })
    }

    fn nueva_planta(&mut self, fields: &Map<String, Value>) -> Option<NuevaPlanta> {
        let map = match fields.get("nueva_planta") {
            Some(Value::Object(map)) => map,
            _ => {
                self.fail("nueva_planta es requerido cuando especie_nueva = true");
                return None;
            }
        };

        self.unknown_fields(map, NUEVA_PLANTA_FIELDS, "nueva_planta.");

        let especie = self.required_text(map, "especie", "La especie es requerida");
        let nombre_cientifico =
            self.required_text(map, "nombre_cientifico", "El nombre científico es requerido");

        let fuente = match text(map, "fuente") {
            None => None,
            Some(raw) => {
                let parsed = FuentePlanta::parse(&raw);
                if parsed.is_none() {
                    self.fail(format!("La fuente debe ser {}", FuentePlanta::wire_names()));
                }
                parsed
            }
        };

        Some(NuevaPlanta {
            especie: especie?,
            nombre_cientifico: nombre_cientifico?,
            variedad: text(map, "variedad").unwrap_or_else(|| VARIEDAD_POR_DEFECTO.to_string()),
            tipo_planta: text(map, "tipo_planta"),
            tipo_planta_otro: text(map, "tipo_planta_otro"),
            fuente,
        })
    }
}
