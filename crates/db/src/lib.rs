//! `db` crate: Postgres persistence for the workflow engine.
//!
//! Provides a connection pool, embedded migrations, typed row structs,
//! repository functions and [`PgStore`], which plugs into the engine as both
//! its workflow source and its execution sink.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use pool::{connect_store, create_pool, run_migrations, DbPool};
pub use store::PgStore;
