//! Warehouse client façade (spec.md section 4.4), the async job supervisor
//! that keeps long-running COPYs alive and observable (section 4.5), and
//! the stage manager that owns per-run upload namespaces (section 4.6).
//!
//! Every other component depends only on what this crate exposes — nothing
//! outside `ingestpipe_db` issues SQL or touches the stage directly.

pub mod client;
pub mod error;
pub mod identifier;
pub mod stage;
pub mod supervisor;

pub use client::{ConnectOptions, JobHandle, JobStatus, WarehouseClient};
pub use error::{DbError, Result};
pub use identifier::Identifier;
pub use stage::{StageManager, StageManagerError};
pub use supervisor::{AsyncJobSupervisor, SupervisorOutcome, SupervisorSettings};
