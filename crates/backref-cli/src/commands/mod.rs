//! Command handlers

pub mod config;
pub mod events;
pub mod graph;
pub mod query;
pub mod status;
pub mod sync;
