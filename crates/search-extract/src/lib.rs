//! Extracts time-ranged records from a paginated, size-limited search API
//! and loads them into a columnar warehouse, via an adaptive window
//! planner, a resilient fetch engine, and a streaming batch loader.

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod record;
pub mod transform;
pub mod warehouse;

pub use config::Config;
pub use error::PipelineError;
pub use orchestrator::{Pipeline, PipelineSummary, RunMode};
pub use record::Record;
pub use warehouse::{HttpWarehouse, TableRef, Warehouse};
