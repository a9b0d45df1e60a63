//! Sub-area artifact build pipeline for subarea.
//!
//! [`Pipeline::build`] fetches a parent relation, fans its sub-areas out to a
//! bounded worker pool and hands the results to an [`ArtifactSink`]: the
//! filesystem store for batch and serve modes, or stdout for print-only runs.

pub mod error;
pub mod pipeline;
pub mod sink;

pub use error::{PipelineError, Result};
pub use pipeline::{BuildReport, Pipeline, SubAreaFailure};
pub use sink::{ArtifactSink, StdoutSink};
