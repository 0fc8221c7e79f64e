//! Custom error types for the backup driver.

use std::time::Duration;
use thiserror::Error;

use crate::protocol::TaskError;

/// Text the engine prints when the addressed backupstore object does not exist.
const NOT_FOUND_MARKER: &str = "cannot find";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("failed to execute: {binary} {args:?}, {status}, output {stdout}, stderr {stderr}")]
    Execution {
        binary: String,
        args: Vec<String>,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("timed out after {timeout:?} executing: {binary} {args:?}")]
    Timeout {
        binary: String,
        args: Vec<String>,
        timeout: Duration,
    },

    #[error("{context}: {source}\n{output}")]
    Decode {
        context: String,
        output: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot find the volume name {0} in the data")]
    VolumeMissing(String),

    #[error("{0}")]
    Catalog(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wrap the error with the operation and target it failed for.
    pub fn context(self, context: impl Into<String>) -> Self {
        EngineError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn decode(
        context: impl Into<String>,
        output: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        EngineError::Decode {
            context: context.into(),
            output: output.into(),
            source,
        }
    }

    /// Whether the remote object the call addressed is absent.
    ///
    /// Read, list and delete operations treat this as a benign empty result.
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::NotFound(_) => true,
            EngineError::Execution { stdout, stderr, .. } => {
                stdout.contains(NOT_FOUND_MARKER) || stderr.contains(NOT_FOUND_MARKER)
            }
            EngineError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Captured standard output of a failed engine invocation, if any.
    pub fn execution_output(&self) -> Option<&str> {
        match self {
            EngineError::Execution { stdout, .. } => Some(stdout),
            EngineError::Context { source, .. } => source.execution_output(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Attach operation context to a fallible engine call.
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;

    /// Map a missing remote object to `None`, keeping every other error.
    fn absent_ok(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|e| e.context(f()))
    }

    fn absent_ok(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
