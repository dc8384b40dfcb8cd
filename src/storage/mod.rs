//! Storage backends for the health time series and alert records
//!
//! This module provides a trait-based abstraction for persisting poll
//! observations and alert state to various backends.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Batch-oriented**: Observation writes arrive in batches from the recorder
//! - **Append-only**: Observation rows are never updated; alert rows transition
//!   from open to resolved exactly once
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, good for small to medium fleets
//! - **In-Memory** (fallback): Ring-buffered, for testing or when no storage
//!   is configured
//!
//! ## Usage
//!
//! ```no_run
//! use fleetmon::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./health.db").await?;
//!     // Use with the recorder and alert evaluator
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, QueryRange, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{AlertRow, ObservationRow, OpenAlert};
