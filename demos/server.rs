//! Example server: two related entities mounted under /api/v1, plus health routes.
//!
//! `DATABASE_URL=postgres://localhost/crudkit cargo run --example server`
//! then e.g. `GET /api/v1/authors?filter={"withCount":true,"preloads":["books"]}`.

use axum::Router;
use chrono::{DateTime, Utc};
use crudkit::{
    common_routes, connect, ensure_database_exists, entity_routes, init_tracing, Entity, ExecutionContext,
    PgStore, Relation, Settings,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Author {
    id: i64,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    books: Vec<Book>,
}

impl Entity for Author {
    const TABLE_NAME: &'static str = "authors";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "name", "createdAt"];

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many::<Book>("books", "id", "author_id")]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Book {
    id: i64,
    title: String,
    author_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<Box<Author>>,
}

impl Entity for Book {
    const TABLE_NAME: &'static str = "books";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "title", "authorId"];

    fn relations() -> Vec<Relation> {
        vec![Relation::belongs_to::<Author>("author", "author_id", "id")]
    }
}

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS authors (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS books (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        author_id BIGINT NOT NULL REFERENCES authors(id) ON DELETE CASCADE
    )",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_tracing("crudkit=debug,server=info");

    ensure_database_exists(&settings.database_url).await?;
    let pool = connect(&settings).await?;
    for ddl in DDL {
        sqlx::query(ddl).execute(&pool).await?;
    }

    let ctx = ExecutionContext::new(Arc::new(PgStore::new(pool))).with_count_scope(settings.count_scope);
    let api = Router::new()
        .nest("/authors", entity_routes::<Author>(ctx.clone()))
        .nest("/books", entity_routes::<Book>(ctx.clone()));
    let app = Router::new()
        .merge(common_routes(ctx))
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(1024 * 1024)));

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
