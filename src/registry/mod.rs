pub mod store;
pub mod task;

pub use store::{BoundTask, MergeOutcome, PendingSubmission, RegistryError, TaskRegistry};
pub use task::{
    ErrorCause, ErrorDetail, Progress, ProgressView, SourceDescriptor, Task, TaskFilter, TaskId,
    TaskKind, TaskStatus, TaskView,
};
