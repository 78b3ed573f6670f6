//! Datagate engine - the evaluation pipeline
//!
//! This crate implements the stages a batch goes through:
//! - Sanity checks (duplicates, freshness, size)
//! - Loading and type detection
//! - Schema validation against the active contract
//! - Profiling, outlier and seasonal anomaly detection
//! - Drift against recent runs
//! - Impact analysis and trust scoring
//! - Gated contract remediation
//!
//! [`Pipeline`] runs them in order and assembles the run report.

pub mod anomaly;
pub mod drift;
pub mod impact;
pub mod loader;
pub mod outcome;
pub mod pipeline;
pub mod profiler;
pub mod remediation;
pub mod sanity;
pub mod schema_check;
pub mod source;
pub mod trust;

pub use outcome::StageOutcome;
pub use pipeline::{EvaluationRequest, Pipeline};
pub use remediation::{AppliedContract, RemediationActuator};
pub use schema_check::SchemaFindings;
pub use source::{BatchFormat, BatchSource, FileBatchSource, InMemoryBatchSource, SourceError, SourceMetadata};
