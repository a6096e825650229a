//! Learning-activity statistics pipeline.
//!
//! Fetches exercise attempts from a remote analytics API, bulk-persists
//! them to Postgres with sequence-assigned ids, and aggregates a five-metric
//! usage report over a time window, delivered by email or to a spreadsheet.

pub mod cli;
pub mod config;
pub mod db;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod report;
pub mod sender;
pub mod store;

pub use config::AppConfig;
pub use models::{Attempt, AttemptType, Report};
pub use store::AttemptStore;
