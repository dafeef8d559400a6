//! Collection reader
//!
//! Reassembles a collection with its user, location (country and division
//! route included), nursery, method, plant and photos. Used as the last step
//! of creation, by the detail endpoint, the listings and the anchoring
//! pipeline.

use ftr_common::db::{
    MetodoRecoleccion, Pais, Planta, Recoleccion, RecoleccionFoto, Ubicacion, UsuarioResumen,
    ViveroResumen,
};
use ftr_common::types::{EstadoRecoleccion, TipoMaterial};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{ApiError, ApiResult};
use crate::pagination::{PageRequest, PaginationMeta};

/// Fully joined collection view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoleccionDetalle {
    #[serde(flatten)]
    pub recoleccion: Recoleccion,
    pub usuario: Option<UsuarioResumen>,
    pub ubicacion: Option<UbicacionDetalle>,
    pub vivero: Option<ViveroResumen>,
    pub metodo: Option<MetodoRecoleccion>,
    pub planta: Option<Planta>,
    pub fotos: Vec<RecoleccionFoto>,
}

/// Location columns plus resolved country and division route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UbicacionDetalle {
    #[serde(flatten)]
    pub ubicacion: Ubicacion,
    pub pais: Option<Pais>,
    pub division: Option<DivisionRuta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivisionRuta {
    pub id: i64,
    /// From the top-level division down to the referenced one
    pub ruta: Vec<DivisionTramo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DivisionTramo {
    pub tipo: String,
    pub nombre: String,
}

/// Fetch one collection; NotFound when absent
pub async fn fetch_detalle(pool: &SqlitePool, id: i64) -> ApiResult<RecoleccionDetalle> {
    find_detalle(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Recolección no encontrada".to_string()))
}

/// Fetch one collection if it exists
pub async fn find_detalle(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<RecoleccionDetalle>, sqlx::Error> {
    let recoleccion = sqlx::query_as::<_, Recoleccion>("SELECT * FROM recoleccion WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let recoleccion = match recoleccion {
        Some(r) => r,
        None => return Ok(None),
    };

    let usuario = sqlx::query_as::<_, UsuarioResumen>(
        "SELECT id, nombre, username, correo FROM usuario WHERE id = ?",
    )
    .bind(recoleccion.usuario_id)
    .fetch_optional(pool)
    .await?;

    let ubicacion = fetch_ubicacion(pool, recoleccion.ubicacion_id).await?;

    let vivero = match recoleccion.vivero_id {
        Some(vivero_id) => {
            sqlx::query_as::<_, ViveroResumen>("SELECT id, codigo, nombre FROM vivero WHERE id = ?")
                .bind(vivero_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let metodo = sqlx::query_as::<_, MetodoRecoleccion>(
        "SELECT id, nombre, descripcion FROM metodo_recoleccion WHERE id = ?",
    )
    .bind(recoleccion.metodo_id)
    .fetch_optional(pool)
    .await?;

    let planta = match recoleccion.planta_id {
        Some(planta_id) => {
            sqlx::query_as::<_, Planta>(
                r#"
                SELECT id, especie, nombre_cientifico, variedad, tipo_planta, tipo_planta_otro,
                       fuente, imagen_url, created_at
                FROM planta WHERE id = ?
                "#,
            )
            .bind(planta_id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };

    let fotos = sqlx::query_as::<_, RecoleccionFoto>(
        "SELECT * FROM recoleccion_foto WHERE recoleccion_id = ? ORDER BY id",
    )
    .bind(recoleccion.id)
    .fetch_all(pool)
    .await?;

    Ok(Some(RecoleccionDetalle {
        recoleccion,
        usuario,
        ubicacion,
        vivero,
        metodo,
        planta,
        fotos,
    }))
}

async fn fetch_ubicacion(
    pool: &SqlitePool,
    ubicacion_id: i64,
) -> Result<Option<UbicacionDetalle>, sqlx::Error> {
    let ubicacion = sqlx::query_as::<_, Ubicacion>(
        r#"
        SELECT id, pais_id, division_id, nombre, referencia, latitud, longitud,
               precision_m, fuente, created_at
        FROM ubicacion WHERE id = ?
        "#,
    )
    .bind(ubicacion_id)
    .fetch_optional(pool)
    .await?;

    let ubicacion = match ubicacion {
        Some(u) => u,
        None => return Ok(None),
    };

    let pais = match ubicacion.pais_id {
        Some(pais_id) => {
            sqlx::query_as::<_, Pais>("SELECT id, codigo_iso2, nombre FROM pais WHERE id = ?")
                .bind(pais_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let division = match ubicacion.division_id {
        Some(division_id) => {
            let ruta = division_route(pool, division_id).await?;
            Some(DivisionRuta {
                id: division_id,
                ruta,
            })
        }
        None => None,
    };

    Ok(Some(UbicacionDetalle {
        ubicacion,
        pais,
        division,
    }))
}

/// Division ancestors, root first, ending at `division_id`
pub async fn division_route(
    pool: &SqlitePool,
    division_id: i64,
) -> Result<Vec<DivisionTramo>, sqlx::Error> {
    sqlx::query_as::<_, DivisionTramo>(
        r#"
        WITH RECURSIVE ruta(id, padre_id, tipo, nombre, nivel) AS (
            SELECT id, padre_id, tipo, nombre, 0
            FROM division_administrativa WHERE id = ?
            UNION ALL
            SELECT d.id, d.padre_id, d.tipo, d.nombre, r.nivel + 1
            FROM division_administrativa d
            JOIN ruta r ON d.id = r.padre_id
            WHERE r.nivel < 16
        )
        SELECT tipo, nombre FROM ruta ORDER BY nivel DESC
        "#,
    )
    .bind(division_id)
    .fetch_all(pool)
    .await
}

/// Query string of the listing endpoints
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListFilters {
    pub fecha_inicio: Option<String>,
    pub fecha_fin: Option<String>,
    pub estado: Option<String>,
    pub tipo_material: Option<String>,
    pub vivero_id: Option<i64>,
    pub search: Option<String>,
    pub q: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Whose collections a listing covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListScope {
    Usuario(i64),
    Vivero(i64),
}

/// Validated listing conditions
#[derive(Debug, Default)]
struct ListConditions {
    fecha_inicio: Option<chrono::NaiveDate>,
    fecha_fin: Option<chrono::NaiveDate>,
    estado: Option<EstadoRecoleccion>,
    tipo_material: Option<TipoMaterial>,
    vivero_id: Option<i64>,
    search: Option<String>,
}

impl ListFilters {
    fn conditions(&self, scope: ListScope) -> ApiResult<ListConditions> {
        let mut messages = Vec::new();

        let mut date = |raw: &Option<String>, field: &str| {
            raw.as_deref()
                .filter(|s| !s.trim().is_empty())
                .and_then(|s| match chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                    Ok(d) => Some(d),
                    Err(_) => {
                        messages.push(format!("{} debe ser una fecha válida (YYYY-MM-DD)", field));
                        None
                    }
                })
        };
        let fecha_inicio = date(&self.fecha_inicio, "fecha_inicio");
        let fecha_fin = date(&self.fecha_fin, "fecha_fin");

        let estado = match self.estado.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => {
                let parsed = EstadoRecoleccion::parse(raw);
                if parsed.is_none() {
                    messages.push(format!(
                        "El estado debe ser {}",
                        EstadoRecoleccion::wire_names()
                    ));
                }
                parsed
            }
            None => None,
        };

        let tipo_material = match self.tipo_material.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => {
                let parsed = TipoMaterial::parse(raw);
                if parsed.is_none() {
                    messages.push(format!(
                        "El tipo de material debe ser {}",
                        TipoMaterial::wire_names()
                    ));
                }
                parsed
            }
            None => None,
        };

        if !messages.is_empty() {
            return Err(ApiError::validation(messages));
        }

        let search = self
            .search
            .as_deref()
            .or(self.q.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(ListConditions {
            fecha_inicio,
            fecha_fin,
            estado,
            tipo_material,
            vivero_id: match scope {
                ListScope::Usuario(_) => self.vivero_id,
                ListScope::Vivero(_) => None,
            },
            search,
        })
    }
}

/// One page of collections
#[derive(Debug, Serialize)]
pub struct RecoleccionPage {
    pub success: bool,
    pub data: Vec<RecoleccionDetalle>,
    pub pagination: PaginationMeta,
}

/// List collections of a user or nursery, newest collection date first
pub async fn list_recolecciones(
    pool: &SqlitePool,
    scope: ListScope,
    filters: &ListFilters,
) -> ApiResult<RecoleccionPage> {
    let conditions = filters.conditions(scope)?;
    let page = PageRequest::new(filters.page, filters.limit);

    let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM recoleccion WHERE ");
    push_conditions(&mut count_query, scope, &conditions);
    let total: i64 = count_query.build_query_scalar().fetch_one(pool).await?;

    let mut ids_query = QueryBuilder::<Sqlite>::new("SELECT id FROM recoleccion WHERE ");
    push_conditions(&mut ids_query, scope, &conditions);
    ids_query.push(" ORDER BY fecha DESC, created_at DESC, id DESC LIMIT ");
    ids_query.push_bind(page.limit);
    ids_query.push(" OFFSET ");
    ids_query.push_bind(page.offset);
    let ids: Vec<i64> = ids_query.build_query_scalar().fetch_all(pool).await?;

    let mut data = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(detalle) = find_detalle(pool, id).await? {
            data.push(detalle);
        }
    }

    Ok(RecoleccionPage {
        success: true,
        data,
        pagination: PaginationMeta::new(page, total),
    })
}

fn push_conditions(query: &mut QueryBuilder<'_, Sqlite>, scope: ListScope, c: &ListConditions) {
    match scope {
        ListScope::Usuario(usuario_id) => {
            query.push("usuario_id = ").push_bind(usuario_id);
        }
        ListScope::Vivero(vivero_id) => {
            query.push("vivero_id = ").push_bind(vivero_id);
        }
    }
    if let Some(fecha) = c.fecha_inicio {
        query.push(" AND fecha >= ").push_bind(fecha);
    }
    if let Some(fecha) = c.fecha_fin {
        query.push(" AND fecha <= ").push_bind(fecha);
    }
    if let Some(estado) = c.estado {
        query.push(" AND estado = ").push_bind(estado.as_str());
    }
    if let Some(tipo) = c.tipo_material {
        query.push(" AND tipo_material = ").push_bind(tipo.as_str());
    }
    if let Some(vivero_id) = c.vivero_id {
        query.push(" AND vivero_id = ").push_bind(vivero_id);
    }
    if let Some(search) = &c.search {
        let pattern = format!("%{}%", search.to_lowercase());
        query
            .push(" AND (LOWER(nombre_cientifico) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(nombre_comercial) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_falls_back_to_q() {
        let filters = ListFilters {
            q: Some(" mara ".to_string()),
            ..Default::default()
        };
        let c = filters.conditions(ListScope::Usuario(1)).unwrap();
        assert_eq!(c.search.as_deref(), Some("mara"));
    }

    #[test]
    fn test_vivero_filter_ignored_for_nursery_scope() {
        let filters = ListFilters {
            vivero_id: Some(9),
            ..Default::default()
        };
        assert_eq!(filters.conditions(ListScope::Usuario(1)).unwrap().vivero_id, Some(9));
        assert_eq!(filters.conditions(ListScope::Vivero(3)).unwrap().vivero_id, None);
    }

    #[test]
    fn test_invalid_filters_are_rejected() {
        let filters = ListFilters {
            fecha_inicio: Some("ayer".to_string()),
            estado: Some("PERDIDO".to_string()),
            ..Default::default()
        };
        let err = filters.conditions(ListScope::Vivero(1)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("fecha_inicio debe ser una fecha válida"));
        assert!(message.contains("El estado debe ser ALMACENADO, EN_PROCESO, UTILIZADO o DESCARTADO"));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let pool = ftr_common::db::init_memory_database().await.unwrap();
        let err = fetch_detalle(&pool, 42).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_division_route_is_root_first() {
        let pool = ftr_common::db::init_memory_database().await.unwrap();
        sqlx::query("INSERT INTO pais (id, codigo_iso2, nombre) VALUES (1, 'BO', 'Bolivia')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO division_administrativa (id, pais_id, padre_id, tipo, nombre) VALUES
                (1, 1, NULL, 'DEPARTAMENTO', 'La Paz'),
                (2, 1, 1, 'PROVINCIA', 'Murillo'),
                (3, 1, 2, 'MUNICIPIO', 'Nuestra Señora de La Paz')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let ruta = division_route(&pool, 3).await.unwrap();
        let nombres: Vec<&str> = ruta.iter().map(|t| t.nombre.as_str()).collect();
        assert_eq!(nombres, vec!["La Paz", "Murillo", "Nuestra Señora de La Paz"]);
        assert_eq!(ruta[0].tipo, "DEPARTAMENTO");
    }
}
