//! Reference data: `(category, code) → description` lookups for subjects,
//! campuses, instructional methods, parts of term, and attributes.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use ts_rs::TS;

use crate::error::Result;

/// One reference data entry.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ReferenceData {
    pub category: String,
    pub code: String,
    pub description: String,
}

/// Batch upsert reference entries in a single round-trip.
pub async fn batch_upsert(entries: &[ReferenceData], db_pool: &PgPool) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let categories: Vec<&str> = entries.iter().map(|e| e.category.as_str()).collect();
    let codes: Vec<&str> = entries.iter().map(|e| e.code.as_str()).collect();
    let descriptions: Vec<&str> = entries.iter().map(|e| e.description.as_str()).collect();

    sqlx::query(
        r#"
        INSERT INTO reference_data (category, code, description)
        SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
        ON CONFLICT (category, code)
        DO UPDATE SET description = EXCLUDED.description, updated_at = now()
        "#,
    )
    .bind(&categories)
    .bind(&codes)
    .bind(&descriptions)
    .execute(db_pool)
    .await?;

    Ok(())
}

/// Fetch every reference entry (for cache warm-up).
pub async fn get_all(db_pool: &PgPool) -> Result<Vec<ReferenceData>> {
    let rows = sqlx::query_as::<_, ReferenceData>(
        "SELECT category, code, description FROM reference_data ORDER BY category, code",
    )
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}

/// Fetch one category's entries.
pub async fn get_category(db_pool: &PgPool, category: &str) -> Result<Vec<ReferenceData>> {
    let rows = sqlx::query_as::<_, ReferenceData>(
        "SELECT category, code, description FROM reference_data WHERE category = $1 ORDER BY code",
    )
    .bind(category)
    .fetch_all(db_pool)
    .await?;
    Ok(rows)
}
