//! Recording executor for driver tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Execute, ExecuteTimeout};
use crate::utils::{EngineError, Result};

type Responder = Box<dyn Fn(&[String]) -> Result<String> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    pub envs: Vec<String>,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub timeout: ExecuteTimeout,
}

/// Answers each invocation from a closure over its arguments and records it.
pub(crate) struct FakeExecutor {
    responder: Responder,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeExecutor {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[String]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations whose arguments contain `needle`.
    pub fn calls_with(&self, needle: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|call| call.args.iter().any(|a| a == needle))
            .collect()
    }
}

/// Failure as the process executor reports a non-zero exit.
pub(crate) fn exit_failure(stdout: &str, stderr: &str) -> EngineError {
    EngineError::Execution {
        binary: "/engine".to_string(),
        args: Vec::new(),
        status: "exit status: 1".to_string(),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl Execute for FakeExecutor {
    async fn execute(
        &self,
        envs: &[String],
        binary: &Path,
        args: &[String],
        timeout: ExecuteTimeout,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(Invocation {
            envs: envs.to_vec(),
            binary: binary.to_path_buf(),
            args: args.to_vec(),
            timeout,
        });
        (self.responder)(args)
    }
}
