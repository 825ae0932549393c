//! Typed failure kinds shared by the compiler, interpreter and control loop.
//!
//! Orchestration code returns `anyhow::Result`; callers that need to branch on
//! the kind use `err.downcast_ref::<JarvisError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JarvisError {
    /// Malformed instruction or action fields. Callers skip and continue.
    #[error("validation error: {0}")]
    Validation(String),

    /// A generation response could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A task depends on a task whose outcome is not cached yet.
    #[error("dependency error: task {task_num} depends on task {missing} which has no compiled outcome")]
    Dependency { task_num: i64, missing: i64 },

    /// The generation collaborator failed (process, network, model).
    #[error("generation error: {0}")]
    Generation(String),

    /// The durable checkpoint store could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl JarvisError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    pub fn is_generation(&self) -> bool {
        matches!(self, Self::Generation(_))
    }
}

/// Classify an `anyhow::Error` chain by its root `JarvisError`, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&JarvisError> {
    err.chain().find_map(|cause| cause.downcast_ref::<JarvisError>())
}
