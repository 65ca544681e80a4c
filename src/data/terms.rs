//! Database operations for term management.
//!
//! Terms represent academic periods that can be enabled or disabled for
//! scraping. The scheduler queries enabled terms to decide which courses to
//! poll; term discovery happens by syncing the upstream term listing.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use ts_rs::TS;

use crate::banner::BannerTerm;
use crate::calendar::Term;
use crate::error::Result;

/// A term record from the database, synced from Banner.
///
/// Named `DbTerm` to avoid collision with [`crate::calendar::Term`], which
/// represents a parsed term code.
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DbTerm {
    /// Term code, e.g. "202610"
    pub code: String,
    /// Description from Banner, e.g. "Fall 2025"
    pub description: String,
    /// Academic year extracted from the code
    pub year: i16,
    /// Season name: "Fall", "Spring", or "Summer"
    pub season: String,
    /// Whether the scraper should process this term
    pub scrape_enabled: bool,
    /// Whether Banner marks this as "View Only"
    pub is_archived: bool,
    /// When we first discovered this term
    #[ts(type = "string")]
    pub discovered_at: DateTime<Utc>,
    /// When a scrape of this term last completed
    #[ts(type = "string | null")]
    pub last_scraped_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Result of a term sync operation.
#[derive(Debug, Default)]
pub struct SyncResult {
    pub inserted: usize,
    pub updated: usize,
    /// Terms skipped due to invalid/unrecognized code format
    pub skipped: usize,
}

/// Get all terms, ordered by code descending (newest first).
pub async fn get_all_terms(db_pool: &PgPool) -> Result<Vec<DbTerm>> {
    let terms = sqlx::query_as::<_, DbTerm>("SELECT * FROM terms ORDER BY code DESC")
        .fetch_all(db_pool)
        .await?;
    Ok(terms)
}

/// Get terms with scraping enabled, ordered by code descending.
pub async fn get_enabled_terms(db_pool: &PgPool) -> Result<Vec<DbTerm>> {
    let terms = sqlx::query_as::<_, DbTerm>(
        "SELECT * FROM terms WHERE scrape_enabled = true ORDER BY code DESC",
    )
    .fetch_all(db_pool)
    .await?;
    Ok(terms)
}

/// Get a single term by code.
pub async fn get_term_by_code(db_pool: &PgPool, code: &str) -> Result<Option<DbTerm>> {
    let term = sqlx::query_as::<_, DbTerm>("SELECT * FROM terms WHERE code = $1")
        .bind(code)
        .fetch_optional(db_pool)
        .await?;
    Ok(term)
}

async fn get_existing_term_codes(db_pool: &PgPool) -> Result<HashSet<String>> {
    let codes: Vec<String> = sqlx::query_scalar("SELECT code FROM terms")
        .fetch_all(db_pool)
        .await?;
    Ok(codes.into_iter().collect())
}

/// Enable scraping for a term. Returns `true` if the term was found.
pub async fn enable_scraping(db_pool: &PgPool, code: &str) -> Result<bool> {
    let result =
        sqlx::query("UPDATE terms SET scrape_enabled = true, updated_at = now() WHERE code = $1")
            .bind(code)
            .execute(db_pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Disable scraping for a term. Returns `true` if the term was found.
pub async fn disable_scraping(db_pool: &PgPool, code: &str) -> Result<bool> {
    let result =
        sqlx::query("UPDATE terms SET scrape_enabled = false, updated_at = now() WHERE code = $1")
            .bind(code)
            .execute(db_pool)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Update the `last_scraped_at` timestamp for a term.
pub async fn update_last_scraped_at(db_pool: &PgPool, code: &str) -> Result<()> {
    sqlx::query("UPDATE terms SET last_scraped_at = now(), updated_at = now() WHERE code = $1")
        .bind(code)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Sync terms from the Banner listing into the database.
///
/// Rules:
/// 1. New terms: only the latest (highest code) gets `scrape_enabled = true`;
///    other discoveries start disabled at low interest.
/// 2. Existing terms: never auto-change `scrape_enabled`, that flag is
///    operator-controlled.
/// 3. Metadata (`description`, `is_archived`) always syncs from Banner.
pub async fn sync_terms_from_banner(
    db_pool: &PgPool,
    banner_terms: Vec<BannerTerm>,
) -> Result<SyncResult> {
    if banner_terms.is_empty() {
        return Ok(SyncResult::default());
    }

    let existing_codes = get_existing_term_codes(db_pool).await?;
    let latest_code = banner_terms.iter().map(|t| &t.code).max().cloned();

    let mut result = SyncResult::default();

    for banner_term in &banner_terms {
        let is_archived = banner_term.is_archived();

        // Legacy terms carry season codes outside 10/20/30; skip them.
        let Ok(term) = Term::from_str(&banner_term.code) else {
            tracing::debug!(
                code = %banner_term.code,
                description = %banner_term.description,
                "skipping term with unrecognized code"
            );
            result.skipped += 1;
            continue;
        };

        if existing_codes.contains(&banner_term.code) {
            sqlx::query(
                "UPDATE terms SET description = $2, is_archived = $3, updated_at = now() \
                 WHERE code = $1",
            )
            .bind(&banner_term.code)
            .bind(&banner_term.description)
            .bind(is_archived)
            .execute(db_pool)
            .await?;

            result.updated += 1;
        } else {
            let scrape_enabled = Some(&banner_term.code) == latest_code.as_ref();

            sqlx::query(
                "INSERT INTO terms (code, description, year, season, scrape_enabled, is_archived) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&banner_term.code)
            .bind(&banner_term.description)
            .bind(term.year as i16)
            .bind(term.season.name())
            .bind(scrape_enabled)
            .bind(is_archived)
            .execute(db_pool)
            .await?;

            result.inserted += 1;

            if scrape_enabled {
                tracing::info!(
                    term_code = %banner_term.code,
                    description = %banner_term.description,
                    "new term discovered and enabled for scraping"
                );
            }
        }
    }

    if result.skipped > 0 {
        tracing::warn!(skipped = result.skipped, "skipped terms with unrecognized codes");
    }

    Ok(result)
}
