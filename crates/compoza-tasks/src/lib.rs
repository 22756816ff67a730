//! Background operations for Compoza
//!
//! - [`TaskList`]: shared, observable list of running and finished tasks
//! - [`BackgroundOperationRunner`]: hosts an [`Operation`] as a cancellable task
//! - [`SseDecoder`]: line decoder for operation progress streams
//! - [`BatchUpdateCoordinator`]: bounded-concurrency project updates

pub mod batch;
pub mod error;
pub mod runner;
pub mod sse;
pub mod task;

pub use batch::{
    BatchReport, BatchUpdateCoordinator, ProjectOutcome, ProjectResult, ProjectUpdater,
    SelfProjectLocator, DEFAULT_BATCH_CONCURRENCY,
};
pub use error::OperationError;
pub use runner::{BackgroundOperationRunner, Operation, RunnerSettings, TaskContext};
pub use sse::{SseDecoder, StreamEvent};
pub use task::{Task, TaskEvent, TaskId, TaskList, TaskStatus};
