use cadence_core::ConfigError;

/// Errors surfaced by the task manager.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid task name: {0:?}")]
    InvalidName(String),

    #[error("Invalid delay {delay} for task {name}")]
    InvalidDelay { name: String, delay: f64 },

    #[error("Task {name} returned unknown status code {code}")]
    UnknownStatus { name: String, code: i32 },

    #[error("Task {name} failed: {source}")]
    TaskFault {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Interrupted")]
    Interrupted,

    #[error("step() called while a frame is already running")]
    ReentrantStep,

    #[error("Task manager has been destroyed")]
    Destroyed,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SchedulerError {
    /// Name of the task that caused the error, if any.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            SchedulerError::InvalidName(name) => Some(name),
            SchedulerError::InvalidDelay { name, .. }
            | SchedulerError::UnknownStatus { name, .. }
            | SchedulerError::TaskFault { name, .. } => Some(name),
            _ => None,
        }
    }
}
