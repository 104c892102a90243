//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod registry;
pub mod retry;
pub mod waiter;
pub mod worker;

pub use engine::{EventHandler, ExecutionEvent, PipelineRunner, RunnerError};
pub use executor::{PageOutcome, StepExecutor};
pub use registry::{RegistryError, StepRegistry};
pub use retry::RetryPolicy;
pub use waiter::{AsyncSignal, AsyncStatus, AsyncWaiter, SignalError, WaitOutcome};
pub use worker::{JobWorker, WorkerError};
