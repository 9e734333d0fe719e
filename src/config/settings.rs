//! Settings loaded from environment variables (a `.env` file is honoured).

use crate::error::RepoError;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/crudkit";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Which query shape `withCount` counts over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountScope {
    /// Table plus `where` only. Joins, groups, preloads and pagination are ignored.
    #[default]
    Predicate,
    /// Table, joins, `where` and groups. Pagination is still ignored.
    Query,
}

impl FromStr for CountScope {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "predicate" => Ok(CountScope::Predicate),
            "query" => Ok(CountScope::Query),
            other => Err(RepoError::Config(format!(
                "CRUDKIT_COUNT_SCOPE must be 'predicate' or 'query', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub count_scope: CountScope,
    /// Listen address for servers built on the crate's routes.
    pub bind_addr: String,
}

impl Settings {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, RepoError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RepoError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_connections = match lookup("CRUDKIT_MAX_CONNECTIONS") {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(s) => match s.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(RepoError::Config(format!(
                        "CRUDKIT_MAX_CONNECTIONS must be a positive integer, got '{}'",
                        s
                    )))
                }
            },
        };
        let count_scope = match lookup("CRUDKIT_COUNT_SCOPE") {
            Some(s) => s.parse()?,
            None => CountScope::default(),
        };
        Ok(Settings {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into()),
            max_connections,
            count_scope,
            bind_addr: lookup("CRUDKIT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
        })
    }
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
