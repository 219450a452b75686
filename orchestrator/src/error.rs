use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

use config_loader::ConfigError;
use platform::PlatformError;

use crate::signal::Interrupt;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("missing environment selection! (e.g --environment=production)")]
    MissingEnvironmentName,

    #[error("missing service selection! (e.g --service=serviceName)")]
    MissingServiceName,

    #[error("no command specified and no Dockerfile found in {}", .dir.display())]
    NoCommandSpecified { dir: PathBuf },

    #[error("couldn't find available port between {start} and {end}")]
    NoAvailablePort { start: u16, end: u16 },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to listen for interrupt signals: {0}")]
    Signals(#[source] std::io::Error),

    #[error("interrupted by {} before the run started", .signal.name())]
    Interrupted { signal: Interrupt },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("building image {image} failed ({status})")]
    ImageBuild { image: String, status: ExitStatus },

    #[error("starting container from {image} failed: {message}")]
    ContainerStart { image: String, message: String },

    #[error("log stream for container {container_id} ended abnormally ({status})")]
    LogStream {
        container_id: String,
        status: ExitStatus,
    },

    #[error("removing container {container_id} failed: {message}")]
    ContainerRemoval {
        container_id: String,
        message: String,
    },

    #[error("tearing down ephemeral environment {name} failed: {source}")]
    EphemeralTeardown {
        name: String,
        source: PlatformError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("{primary}\nadditionally: {cleanup}")]
    WithCleanup {
        primary: Box<RunError>,
        cleanup: Box<RunError>,
    },
}

impl RunError {
    /// Attaches a cleanup failure without hiding the error that came first.
    pub fn with_cleanup(self, cleanup: RunError) -> RunError {
        RunError::WithCleanup {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }
}

/// Combines a run result with the outcome of its cleanup step.
pub(crate) fn merge_cleanup<T>(
    result: Result<T, RunError>,
    cleanup: Result<(), RunError>,
) -> Result<T, RunError> {
    match (result, cleanup) {
        (result, Ok(())) => result,
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(primary), Err(cleanup)) => Err(primary.with_cleanup(cleanup)),
    }
}
