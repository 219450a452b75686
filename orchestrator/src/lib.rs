//! Runs a project's code locally with the variables of one of its remote
//! environments, either as a plain subprocess or inside a container built
//! from the project's Dockerfile.

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use config_loader::{ConfigManager, ProjectConfig};
use platform::{Environment, EnvironmentVariableSet, Platform};

pub mod args;
pub mod container;
pub mod ephemeral;
pub mod error;
pub mod port;
pub mod signal;
pub mod strategy;
pub mod subprocess;
pub mod ui;

pub use args::RunRequest;
pub use container::{ContainerRunner, ContainerRuntime, DockerCli};
pub use ephemeral::EphemeralEnvironmentManager;
pub use error::RunError;
pub use signal::{Interrupt, SignalListener};
pub use strategy::ExecutionStrategy;

use container::ContainerTarget;
use port::{DEFAULT_PORT_RANGE, DEFAULT_PORT_START};

/// How the wrapped program finished. A non-zero code is the program's own
/// failure, not an orchestrator error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
}

impl RunOutcome {
    pub const SUCCESS: RunOutcome = RunOutcome { exit_code: 0 };

    /// Termination by a signal maps to `128 + signo`, as shells report it.
    pub fn from_status(status: &ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self { exit_code: code };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signo) = status.signal() {
                return Self {
                    exit_code: 128 + signo,
                };
            }
        }

        Self { exit_code: 1 }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

type ListenerFactory = Box<dyn Fn() -> io::Result<SignalListener> + Send + Sync>;

pub struct RunOrchestrator {
    config: ConfigManager,
    platform: Arc<dyn Platform>,
    runtime: Arc<dyn ContainerRuntime>,
    port_start: u16,
    port_range: u16,
    listener_factory: ListenerFactory,
}

impl RunOrchestrator {
    pub fn new(
        config: ConfigManager,
        platform: Arc<dyn Platform>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            config,
            platform,
            runtime,
            port_start: DEFAULT_PORT_START,
            port_range: DEFAULT_PORT_RANGE,
            listener_factory: Box::new(SignalListener::os),
        }
    }

    /// Replaces the OS signal subscription made for each run.
    pub fn with_signals<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> io::Result<SignalListener> + Send + Sync + 'static,
    {
        self.listener_factory = Box::new(factory);
        self
    }

    pub fn with_port_range(mut self, start: u16, range: u16) -> Self {
        self.port_start = start;
        self.port_range = range;
        self
    }

    #[instrument(skip(self, raw_args))]
    pub async fn execute<I, S>(&self, raw_args: I, cwd: &Path) -> Result<RunOutcome, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = RunRequest::parse(raw_args)?;
        let strategy = ExecutionStrategy::select(&request.command, cwd)?;
        debug!("Using {} execution", strategy.name());

        // Subscribe before any remote call: an interrupt during setup has to
        // unwind through ephemeral teardown.
        let mut listener = (self.listener_factory)().map_err(RunError::Signals)?;

        let project = self.config.project_config(cwd)?;
        let base = signal::interruptible(
            &mut listener,
            self.resolve_environment(&project, request.environment.as_deref()),
        )
        .await?;
        info!("Running against environment {}", base.name);

        let manager = EphemeralEnvironmentManager::new(self.platform.as_ref(), &project.project_id);
        let project = &project;
        let request = &request;
        let strategy = &strategy;
        let listener = &mut listener;

        manager
            .with_ephemeral(base, request.ephemeral, |environment| async move {
                let vars = signal::interruptible(listener, async {
                    self.platform
                        .environment_variables(
                            &project.project_id,
                            &environment,
                            request.service.as_deref(),
                        )
                        .await
                        .map_err(RunError::from)
                })
                .await?;
                debug!("Injecting {} variables", vars.len());

                self.dispatch(strategy, project, &environment, &vars, cwd, listener)
                    .await
            })
            .await
    }

    async fn resolve_environment(
        &self,
        project: &ProjectConfig,
        name: Option<&str>,
    ) -> Result<Environment, RunError> {
        let environment = match name {
            Some(name) => {
                self.platform
                    .environment_by_name(&project.project_id, name)
                    .await?
            }
            None => {
                let id = project.active_environment()?;
                self.platform.environment(&project.project_id, id).await?
            }
        };
        Ok(environment)
    }

    async fn dispatch(
        &self,
        strategy: &ExecutionStrategy,
        project: &ProjectConfig,
        environment: &Environment,
        vars: &EnvironmentVariableSet,
        cwd: &Path,
        listener: &mut SignalListener,
    ) -> Result<RunOutcome, RunError> {
        match strategy {
            ExecutionStrategy::Subprocess { command } => {
                let status = subprocess::run(command, vars, cwd, listener).await?;
                Ok(RunOutcome::from_status(&status))
            }
            ExecutionStrategy::Container => {
                let remote_project = signal::interruptible(listener, async {
                    self.platform
                        .project(&project.project_id)
                        .await
                        .map_err(RunError::from)
                })
                .await?;
                let target = ContainerTarget {
                    dir: cwd,
                    project_name: &remote_project.name,
                    environment_name: &environment.name,
                };
                ContainerRunner::new(self.runtime.as_ref(), self.port_start, self.port_range)
                    .run(&target, vars, listener)
                    .await?;
                Ok(RunOutcome::SUCCESS)
            }
        }
    }
}
