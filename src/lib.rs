//! # acadmetrics
//!
//! Scholarly-output reconciliation, classification, and metrics pipeline.
//!
//! ## Modules
//!
//! - [`fetch`] - Provider fetchers (citation index scraping, bibliographic API)
//! - [`normalize`] - Raw record blobs into publication drafts
//! - [`resolve`] - Identity resolution against the candidate pool
//! - [`merge`] - Deterministic field-level merging
//! - [`classify`] - LLM category assignment with schema validation and retries
//! - [`aggregate`] - Per-author and per-department metric accumulators
//! - [`store`] - Publication persistence
//! - [`pipeline`] - Run orchestration
//! - [`export`] - CSV/JSON metric snapshots
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use acadmetrics::fetch::bibliographic::BiblioClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = BiblioClient::new()?;
//!     let records = client.fetch_works("State University", 2023, 2024).await?;
//!     println!("Fetched {} records", records.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod classify;
pub mod error;
pub mod export;
pub mod fetch;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod publication;
pub mod resolve;
pub mod store;
pub mod taxonomy;

pub use error::{AcadError, Result};
