//! silo - step-based migration engine for importing issue trackers

pub mod cli;
pub mod core;
pub mod credentials;
pub mod execution;
pub mod persistence;
pub mod providers;
pub mod source;
pub mod target;

// Re-export commonly used types
pub use core::{JobRequest, JobResult, JobStatus, Provider, Step, StepPipeline};
pub use execution::{ExecutionEvent, JobWorker, PipelineRunner, StepRegistry};
