//! crudkit: generic filter-driven repository over PostgreSQL.
//!
//! A record type implements [`Entity`]; [`CrudService`] then provides find-many (with the
//! [`Filter`] model), save, update, find-one and delete for it, and [`entity_routes`] exposes
//! those operations over HTTP.

pub mod case;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod resolver;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod store;

pub use config::{connect, ensure_database_exists, init_tracing, CountScope, Settings};
pub use context::ExecutionContext;
pub use entity::{Entity, EntityDescriptor, KeyKind, Relation, RelationKind};
pub use error::RepoError;
pub use filter::{Filter, Preload};
pub use routes::{common_routes, entity_routes};
pub use service::CrudService;
pub use sql::{PgBindValue, Predicate};
pub use store::{PgStore, Store, StoreTx};
