//! Traceability code generation (`REC-<year>-<seq>`)
//!
//! One counter row per calendar year, bumped atomically with an upsert inside
//! the write transaction. The first use of a year seeds the counter from the
//! number of collections already dated in that year.

use chrono::{Datelike, NaiveDate};
use sqlx::SqliteConnection;

pub fn format_trace_code(year: i32, seq: i64) -> String {
    format!("REC-{}-{:03}", year, seq)
}

/// Reserve the next code for a collection dated `fecha`
pub async fn next_trace_code(
    conn: &mut SqliteConnection,
    fecha: NaiveDate,
) -> Result<String, sqlx::Error> {
    let year = fecha.year();
    let inicio = format!("{:04}-01-01", year);
    let fin = format!("{:04}-12-31", year);

    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO contador_trazabilidad (anio, ultimo)
        VALUES (?, (SELECT COUNT(*) FROM recoleccion WHERE fecha >= ? AND fecha <= ?) + 1)
        ON CONFLICT(anio) DO UPDATE SET ultimo = ultimo + 1
        RETURNING ultimo
        "#,
    )
    .bind(year)
    .bind(&inicio)
    .bind(&fin)
    .fetch_one(&mut *conn)
    .await?;

    Ok(format_trace_code(year, seq))
}
