//! Pool construction and database bootstrap.

use super::Settings;
use crate::error::RepoError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

pub async fn connect(settings: &Settings) -> Result<PgPool, RepoError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;
    tracing::info!(max_connections = settings.max_connections, "database pool ready");
    Ok(pool)
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// `postgres` maintenance database to run CREATE DATABASE. Call before [`connect`].
pub async fn ensure_database_exists(database_url: &str) -> Result<(), RepoError> {
    let (admin_url, db_name) = split_database_name(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = PgConnectOptions::from_str(&admin_url)
        .map_err(|e| RepoError::Config(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn = opts.connect().await?;
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists {
        sqlx::query(&format!("CREATE DATABASE {}", crate::sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "created database");
    }
    Ok(())
}

/// `postgres://h/db?x` -> (`postgres://h/postgres?x`, `db`).
fn split_database_name(url: &str) -> Result<(String, String), RepoError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| RepoError::Config("DATABASE_URL: no database path".into()))?
        + 1;
    let rest = &url[path_start..];
    let (name, query) = match rest.split_once('?') {
        Some((n, q)) => (n, Some(q)),
        None => (rest, None),
    };
    let mut admin = format!("{}postgres", &url[..path_start]);
    if let Some(q) = query {
        admin.push('?');
        admin.push_str(q);
    }
    Ok((admin, name.trim().to_string()))
}
