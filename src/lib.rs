//! # Gemvision
//!
//! A multi-image gemstone analysis pipeline. Every photograph of one
//! inventory item - product shots, labels, digital scales, calipers,
//! thickness gauges, certificates - goes to a vision-capable language model
//! in a single batched call. The reply is parsed defensively, validated for
//! completeness against the supplied image count, consolidated into canonical
//! attributes, and persisted with full cost and confidence accounting.
//!
//! ## Pipeline
//!
//! ```text
//! work queue → fetch images (concurrent) → one model call → parse →
//!   validate → extract attributes → select primary image → persist (SQLite)
//! ```
//!
//! ## Guarantees
//!
//! - Every supplied image must be accounted for in the reply; a count
//!   mismatch is recorded, never papered over.
//! - Manually entered attribute values are never overwritten by extraction,
//!   regardless of the model's claimed confidence.
//! - Model calls are never retried; unusable replies are recorded outcomes.
//! - A single item's failure never aborts the batch.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gemvision::{Config, BatchOrchestrator, RunOptions};
//! use gemvision::images::ImageFetcher;
//! use gemvision::storage::SqliteStorage;
//! use gemvision::vision::VisionClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let fetcher = ImageFetcher::new(&config.request)?;
//!     let vision = VisionClient::new(&config.vision, &config.request)?;
//!     let orchestrator = BatchOrchestrator::new(storage, fetcher, vision, config.policy);
//!     let stats = orchestrator.run(RunOptions::default()).await?;
//!     println!("{stats}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Response parsing, validation, extraction, and primary-image selection.
pub mod analysis;
/// Configuration management loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Image download and base64 encoding for model transmission.
pub mod images;
/// Batch orchestration and run statistics.
pub mod pipeline;
/// Analysis prompt construction.
pub mod prompts;
/// SQLite storage layer for items, runs, readings, and costs.
pub mod storage;
/// Vision model client and wire types.
pub mod vision;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{BatchOrchestrator, RunOptions, RunStats};
