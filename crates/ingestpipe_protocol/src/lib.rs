//! Shared data model for the bulk warehouse ingestion engine.
//!
//! This crate holds the types every other crate depends on: the
//! configuration shape, the per-file value objects that flow through the
//! pipeline, and the error taxonomy. Nothing here touches the filesystem or
//! the network — it is pure data plus the invariants spec.md attaches to it.

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use cancel::CancellationToken;
pub use config::{
    migrate_config_json, Config, ConfigError, ConfigVersion, FileSpec, ValidationSettings,
    WarehouseConfig,
};
pub use error::{ErrorKind, IngestError, Result};
pub use events::{JobSummary, Phase, ProgressEvent, Stream};
pub use types::{
    AnomalousDate, DataFormat, DeletionResult, DeletionStatus, DeletionTarget, DuplicateDigest,
    FailureReason, FileAnalysis, GapSegment, LoadPlan, LoadResult, LoadStatus, ResolvedFile,
    RowCountStats, Severity, ValidationResult,
};
