//! Actor-based polling pipeline
//!
//! This module implements the scheduler core as a set of actors. Each actor
//! runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌─────────────────┐
//!                 │   Hub (main)    │
//!                 └────────┬────────┘
//!                          │ spawns
//!             ┌────────────┴────────────┐
//!             │                         │
//!     ┌───────▼────────┐       ┌───────▼────────┐
//!     │   Scheduler    │──────▶│  Worker Pool   │
//!     │ (fleet ticker) │submit │ (single-flight │
//!     └────────────────┘       │  + reaper)     │
//!                              └───────┬────────┘
//!                                      │ per-device worker tasks
//!                              ┌───────▼────────┐
//!                              │ Poll Executor  │ (retry + classify,
//!                              │ via Transport) │  one run per slot)
//!                              └───────┬────────┘
//!                                      │ publish ObservationEvent
//!                           ┌──────────▼──────────┐
//!                           │  Broadcast Channel  │
//!                           └──────────┬──────────┘
//!                                      │ subscribe
//!                              ┌───────▼────────┐
//!                              │    Recorder    │ (append + registry
//!                              │                │  bookkeeping)
//!                              └───────┬────────┘
//!                                      │ publish RecordedEvent
//!                              ┌───────▼────────┐
//!                              │  Alert Actor   │ (OK ⇄ ALERTING)
//!                              └────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: fires on the fleet interval, fans out one poll job
//!   per due device without waiting on any individual poll
//! - **WorkerPoolActor**: bounded pool with a per-device slot table
//!   (single-flight) and a maintenance reaper for stuck workers
//! - **RecorderActor**: batches observations into the storage backend and
//!   maintains per-device registry bookkeeping
//! - **AlertActor**: per-device OK/ALERTING state machine over recorded
//!   observations
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Events**: actors publish events to broadcast channels for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod alert;
pub mod executor;
pub mod messages;
pub mod recorder;
pub mod scheduler;
pub mod worker_pool;
