//! Repository behaviour against a live PostgreSQL. Each test returns early when
//! `DATABASE_URL` is not set.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use crudkit::{entity_routes, CrudService, Entity, ExecutionContext, Filter, PgStore, Relation, RepoError};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

async fn pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    Some(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect"),
    )
}

async fn reset(pool: &PgPool, statements: &[&str]) {
    for s in statements {
        sqlx::query(s).execute(pool).await.expect("ddl");
    }
}

fn context(pool: PgPool) -> ExecutionContext {
    ExecutionContext::new(Arc::new(PgStore::new(pool)))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    id: i64,
    full_name: String,
    age: i32,
    #[serde(default)]
    nickname: Option<String>,
}

impl Entity for Person {
    const TABLE_NAME: &'static str = "it_people";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "fullName", "age", "nickname"];
}

#[tokio::test]
async fn single_key_lifecycle() {
    let Some(pool) = pool().await else { return };
    reset(
        &pool,
        &[
            "DROP TABLE IF EXISTS it_people",
            "CREATE TABLE it_people (id BIGSERIAL PRIMARY KEY, full_name TEXT NOT NULL, age INT NOT NULL, nickname TEXT)",
        ],
    )
    .await;
    let ctx = context(pool);

    let ann = Person {
        full_name: "Ann Lee".into(),
        age: 31,
        ..Person::default()
    };
    let saved = CrudService::<Person>::save(&ctx, ann.clone()).await.unwrap();
    assert!(saved.id > 0);
    let found = CrudService::<Person>::find_by_id(&ctx, &saved.id.to_string()).await.unwrap();
    assert_eq!(found, Person { id: saved.id, ..ann });

    let renamed = CrudService::<Person>::save(
        &ctx,
        Person {
            full_name: "Ann Park".into(),
            ..found.clone()
        },
    )
    .await
    .unwrap();
    assert_eq!(renamed.id, saved.id);
    assert_eq!(renamed.full_name, "Ann Park");

    let patched = CrudService::<Person>::update(
        &ctx,
        Person {
            id: saved.id,
            full_name: "Ann P.".into(),
            age: 32,
            nickname: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(patched.full_name, "Ann P.");

    let missing = Person {
        id: saved.id + 1000,
        ..Person::default()
    };
    assert!(matches!(
        CrudService::<Person>::delete(&ctx, &missing).await,
        Err(RepoError::NotFound(_))
    ));
    CrudService::<Person>::delete(&ctx, &patched).await.unwrap();
    assert!(matches!(
        CrudService::<Person>::find_by_id(&ctx, &saved.id.to_string()).await,
        Err(RepoError::NotFound(_))
    ));
}

#[tokio::test]
async fn count_reflects_predicate_only() {
    let Some(pool) = pool().await else { return };
    reset(
        &pool,
        &[
            "DROP TABLE IF EXISTS it_counted",
            "CREATE TABLE it_counted (id BIGSERIAL PRIMARY KEY, full_name TEXT NOT NULL, age INT NOT NULL, nickname TEXT)",
        ],
    )
    .await;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Counted {
        id: i64,
        full_name: String,
        age: i32,
    }
    impl Entity for Counted {
        const TABLE_NAME: &'static str = "it_counted";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const FIELDS: &'static [&'static str] = &["id", "fullName", "age"];
    }

    let ctx = context(pool);
    for i in 0..12 {
        let rec = Counted {
            full_name: format!("p{}", i),
            age: if i < 10 { 40 } else { 10 },
            ..Counted::default()
        };
        CrudService::<Counted>::save(&ctx, rec).await.unwrap();
    }

    let filter = Filter::new()
        .where_clause("age > ?", [json!(18)])
        .order("id desc")
        .with_count()
        .limit(2)
        .offset(1);
    let (rows, count) = CrudService::<Counted>::find_many(&ctx, &filter).await.unwrap();
    assert_eq!((rows.len(), count), (2, 10));
    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![9, 8]);

    let (all, count) = CrudService::<Counted>::find_many(&ctx, &Filter::new()).await.unwrap();
    assert_eq!((all.len(), count), (12, 0));

    let malformed = Filter::parse(r#"{"joins": "not-an-array"}"#);
    assert!(matches!(malformed, Err(RepoError::MalformedFilter { field: "joins", .. })));
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Grant {
    tenant: String,
    code: i64,
    role: String,
}

impl Entity for Grant {
    const TABLE_NAME: &'static str = "it_grants";
    const PRIMARY_KEY: &'static [&'static str] = &["tenant", "code"];
    const FIELDS: &'static [&'static str] = &["tenant", "code", "role"];
}

#[tokio::test]
async fn composite_key_lookup() {
    let Some(pool) = pool().await else { return };
    reset(
        &pool,
        &[
            "DROP TABLE IF EXISTS it_grants",
            "CREATE TABLE it_grants (tenant TEXT NOT NULL, code BIGINT NOT NULL, role TEXT NOT NULL, PRIMARY KEY (tenant, code))",
        ],
    )
    .await;
    let ctx = context(pool);
    let g = Grant {
        tenant: "acme".into(),
        code: 7,
        role: "admin".into(),
    };
    CrudService::<Grant>::save(&ctx, g.clone()).await.unwrap();
    assert_eq!(CrudService::<Grant>::find_by_id(&ctx, "acme,7").await.unwrap(), g);
    // falls back to matching the whole string against `tenant`
    assert!(matches!(
        CrudService::<Grant>::find_by_id(&ctx, "acme,7,9").await,
        Err(RepoError::NotFound(_))
    ));
    CrudService::<Grant>::delete_by_id(&ctx, "acme,7").await.unwrap();
    assert!(matches!(
        CrudService::<Grant>::find_by_id(&ctx, "acme,7").await,
        Err(RepoError::NotFound(_))
    ));
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Team {
    id: i64,
    title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    members: Vec<Member>,
}

impl Entity for Team {
    const TABLE_NAME: &'static str = "it_teams";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "title"];

    fn relations() -> Vec<Relation> {
        vec![Relation::has_many::<Member>("members", "id", "team_id")]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Member {
    id: i64,
    team_id: i64,
    handle: String,
}

impl Entity for Member {
    const TABLE_NAME: &'static str = "it_members";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "teamId", "handle"];
}

#[tokio::test]
async fn preloads_attach_related_rows() {
    let Some(pool) = pool().await else { return };
    reset(
        &pool,
        &[
            "DROP TABLE IF EXISTS it_members",
            "DROP TABLE IF EXISTS it_teams",
            "CREATE TABLE it_teams (id BIGSERIAL PRIMARY KEY, title TEXT NOT NULL)",
            "CREATE TABLE it_members (id BIGSERIAL PRIMARY KEY, team_id BIGINT NOT NULL REFERENCES it_teams(id), handle TEXT NOT NULL)",
        ],
    )
    .await;
    let ctx = context(pool);
    let team = CrudService::<Team>::save(
        &ctx,
        Team {
            title: "core".into(),
            ..Team::default()
        },
    )
    .await
    .unwrap();
    for handle in ["ann", "bob", "cy"] {
        CrudService::<Member>::save(
            &ctx,
            Member {
                team_id: team.id,
                handle: handle.into(),
                ..Member::default()
            },
        )
        .await
        .unwrap();
    }

    let filter = Filter::parse(r#"{"preloads": ["members", "handle <> ?", "bob"]}"#).unwrap();
    let (teams, _) = CrudService::<Team>::find_many(&ctx, &filter).await.unwrap();
    let mut handles: Vec<_> = teams[0].members.iter().map(|m| m.handle.as_str()).collect();
    handles.sort();
    assert_eq!(handles, vec!["ann", "cy"]);
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Visit {
    id: i64,
    name: String,
    age: i32,
    #[serde(default)]
    visited_on: Option<NaiveDate>,
}

impl Entity for Visit {
    const TABLE_NAME: &'static str = "it_visits";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const FIELDS: &'static [&'static str] = &["id", "name", "age", "visitedOn"];
}

#[tokio::test]
async fn typed_columns_with_filters_and_patches() {
    let Some(pool) = pool().await else { return };
    reset(
        &pool,
        &[
            "DROP TABLE IF EXISTS it_visits",
            "CREATE TABLE it_visits (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, age INT NOT NULL, visited_on DATE NOT NULL)",
        ],
    )
    .await;
    let ctx = context(pool);
    for (name, age, day) in [("ann", 31, 4), ("bob", 22, 20), ("cy", 45, 28)] {
        let visit = Visit {
            name: name.into(),
            age,
            visited_on: NaiveDate::from_ymd_opt(2021, 3, day),
            ..Visit::default()
        };
        CrudService::<Visit>::save(&ctx, visit).await.unwrap();
    }

    // string params against date, bigint and int columns
    let names = |visits: Vec<Visit>| visits.into_iter().map(|v| v.name).collect::<Vec<_>>();
    let after = Filter::parse(r#"{"where": ["visited_on > ?", "2021-03-10"], "order": "id"}"#).unwrap();
    let (visits, _) = CrudService::<Visit>::find_many(&ctx, &after).await.unwrap();
    assert_eq!(names(visits), vec!["bob", "cy"]);

    let listed = Filter::parse(r#"{"where": ["id IN (?) AND name <> ?", [1, 3], "o'brien"], "order": "id desc"}"#).unwrap();
    let (visits, _) = CrudService::<Visit>::find_many(&ctx, &listed).await.unwrap();
    assert_eq!(names(visits), vec!["cy", "ann"]);

    let numeric = Filter::parse(r#"{"where": ["age >= ?", "30"], "withCount": true}"#).unwrap();
    let (_, count) = CrudService::<Visit>::find_many(&ctx, &numeric).await.unwrap();
    assert_eq!(count, 2);

    // PATCH writes the body's fields only
    let res = entity_routes::<Visit>(ctx.clone())
        .oneshot(
            Request::patch("/1")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name":"renamed"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["data"]["age"], 31);

    let stored = CrudService::<Visit>::find_by_id(&ctx, "1").await.unwrap();
    assert_eq!(
        stored,
        Visit {
            id: 1,
            name: "renamed".into(),
            age: 31,
            visited_on: NaiveDate::from_ymd_opt(2021, 3, 4),
        }
    );

    let zeroed = CrudService::<Visit>::update_fields_by_id(&ctx, "1", Visit::default(), &["age"])
        .await
        .unwrap();
    assert_eq!((zeroed.name.as_str(), zeroed.age), ("renamed", 0));
}
