//! User rows for the admin API edge. The core only persists them; all
//! authentication happens in the collaborating admin service.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// A registered admin-edge user.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct User {
    pub id: i32,
    pub discord_id: i64,
    pub discord_username: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert or refresh a user row, returning the stored record.
pub async fn upsert_user(
    pool: &PgPool,
    discord_id: i64,
    discord_username: &str,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (discord_id, discord_username) VALUES ($1, $2) \
         ON CONFLICT (discord_id) DO UPDATE SET discord_username = EXCLUDED.discord_username \
         RETURNING *",
    )
    .bind(discord_id)
    .bind(discord_username)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

/// Fetch a user by id.
pub async fn get_by_id(pool: &PgPool, id: i32) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}
