use std::path::Path;

use crate::error::RunError;

/// File whose presence at the project root means "build and run a container".
pub const BUILD_DESCRIPTOR: &str = "Dockerfile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStrategy {
    Subprocess { command: Vec<String> },
    Container,
}

impl ExecutionStrategy {
    /// An explicit command always runs as a subprocess; the build descriptor
    /// only matters when there is none.
    pub fn select(command: &[String], project_dir: &Path) -> Result<Self, RunError> {
        if !command.is_empty() {
            return Ok(ExecutionStrategy::Subprocess {
                command: command.to_vec(),
            });
        }

        if project_dir.join(BUILD_DESCRIPTOR).is_file() {
            return Ok(ExecutionStrategy::Container);
        }

        Err(RunError::NoCommandSpecified {
            dir: project_dir.to_path_buf(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionStrategy::Subprocess { .. } => "subprocess",
            ExecutionStrategy::Container => "container",
        }
    }
}
