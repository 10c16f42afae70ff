//! Pipeline Controller, Job Orchestrator, Progress Tracker, and the
//! Deletion Planner/Executor (spec.md sections 4.7, 4.8, 4.12, 4.11).
//!
//! Everything in this crate is driven through [`ingestpipe_db`] and
//! [`ingestpipe_worker`]; it owns no SQL beyond the COPY/DELETE statement
//! shapes spec.md names and the post-load validation query, which lives in
//! [`ingestpipe_validate`].

pub mod controller;
pub mod deletion;
pub mod orchestrator;
pub mod progress;
pub mod resolve;

pub use controller::{PipelineController, PipelineSettings};
pub use deletion::{DeletionExecutor, DeletionExecutorError, DeletionPlan, DeletionRequest};
pub use orchestrator::{default_max_workers, Orchestrator, OrchestratorSummary};
pub use progress::{DisplayMode, EventSink, JsonlSink, NullSink, ProgressHandle, ProgressTracker};
pub use resolve::{month_bounds, resolve_file_spec, ResolveError};
