//! Storage layer
//!
//! Schema definition, versioning and migrations for the SQLite index.
//! Row-level access lives in [`crate::store`].

pub mod schema;

pub use schema::SCHEMA_VERSION;
