//! Persistence layer: a Postgres connection pool plus one repository
//! module per table, grouped the way the relational schema in spec §3
//! groups them.

pub mod aggregation;
pub mod backoffice;
pub mod documents;
pub mod operators;
pub mod pages;
pub mod pool;
pub mod requests;

pub use pool::{connect, connect_and_migrate, run_migrations, DatabaseConfig, DbPool};
