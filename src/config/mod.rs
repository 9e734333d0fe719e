//! Runtime configuration: environment-driven settings, pool construction, tracing setup.

mod database;
mod settings;

pub use database::{connect, ensure_database_exists};
pub use settings::{init_tracing, CountScope, Settings};
