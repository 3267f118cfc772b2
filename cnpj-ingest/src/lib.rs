//! cnpj-ingest - CNPJ open-data ingestion service
//!
//! Downloads the monthly Receita Federal CNPJ release, extracts it and
//! streams it into a denormalised PostgreSQL store:
//!
//! - `services::catalogue` - release discovery over the HTML directory index
//! - `services::downloader` - resumable parallel archive download
//! - `services::extractor` - idempotent zip extraction
//! - `ingest` - the four-phase streaming loader with durable checkpoints
//! - `db` - schema bootstrap, checkpoint store, version registry
//! - `services::pipeline` - end-to-end orchestration
//! - `jobs` / `api` - supervised update worker behind a small admin surface

pub mod api;
pub mod db;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod services;

pub use error::{PipelineError, Result};
