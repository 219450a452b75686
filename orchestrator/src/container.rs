//! Builds the project's image, runs it with the environment's variables and
//! follows its logs until it stops or the user interrupts.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use platform::EnvironmentVariableSet;

use crate::error::{merge_cleanup, RunError};
use crate::port::find_available_port;
use crate::signal::{self, ExecutionHandle, Interrupt, SignalHook, SignalListener};
use crate::strategy::BUILD_DESCRIPTOR;
use crate::ui;

pub const IMAGE_NAMESPACE: &str = "railway-local";
pub const PORT_VARIABLE: &str = "PORT";
pub const LOOPBACK: &str = "127.0.0.1";

/// Exit code the docker CLI reports when its log stream is cut by ctrl-c.
const INTERRUPTED_LOGS_EXIT_CODE: i32 = 255;

static DISALLOWED_TAG_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[^A-Za-z0-9_-]").unwrap_or_else(|e| panic!("invalid tag pattern: {}", e))
});

fn sanitize(part: &str) -> String {
    DISALLOWED_TAG_CHARS.replace_all(part, "").to_lowercase()
}

pub fn image_tag(project_name: &str, environment_name: &str) -> String {
    format!(
        "{}/{}-{}:latest",
        IMAGE_NAMESPACE,
        sanitize(project_name),
        sanitize(environment_name)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub external: u16,
    /// The container's own port: `PORT` from the variable set, else the external port.
    pub internal: String,
    /// Whether `PORT` has to be passed separately because the set lacks it.
    pub inject_port: bool,
}

impl PortMapping {
    pub fn resolve(vars: &EnvironmentVariableSet, external: u16) -> Self {
        match vars.get(PORT_VARIABLE) {
            Some(port) => Self {
                external,
                internal: port.to_string(),
                inject_port: false,
            },
            None => Self {
                external,
                internal: external.to_string(),
                inject_port: true,
            },
        }
    }

    pub fn publish_spec(&self) -> String {
        format!("{}:{}:{}", LOOPBACK, self.external, self.internal)
    }
}

pub fn build_args(dir: &Path, tag: &str, vars: &EnvironmentVariableSet) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-q".to_string(),
        "-t".to_string(),
        tag.to_string(),
    ];
    for (name, value) in vars {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", name, value));
    }
    args.push(dir.display().to_string());
    args
}

pub fn run_args(tag: &str, ports: &PortMapping, vars: &EnvironmentVariableSet) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--init".to_string(),
        "--rm".to_string(),
        "-d".to_string(),
        "-p".to_string(),
        ports.publish_spec(),
    ];
    if ports.inject_port {
        args.push("-e".to_string());
        args.push(format!("{}={}", PORT_VARIABLE, ports.internal));
    }
    for (name, value) in vars {
        args.push("-e".to_string());
        args.push(format!("{}={}", name, value));
    }
    args.push(tag.to_string());
    args
}

/// True when the log stream ended because of a forwarded interrupt.
pub fn is_interrupt_exit(status: &ExitStatus) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return signo == libc::SIGINT || signo == libc::SIGTERM;
        }
    }

    matches!(
        status.code(),
        Some(INTERRUPTED_LOGS_EXIT_CODE) | Some(130) | Some(143)
    )
}

/// The container engine, driven through its command line.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn build(
        &self,
        dir: &Path,
        tag: &str,
        vars: &EnvironmentVariableSet,
    ) -> Result<(), RunError>;

    /// Starts a detached container and returns its id.
    async fn start(
        &self,
        tag: &str,
        ports: &PortMapping,
        vars: &EnvironmentVariableSet,
    ) -> Result<String, RunError>;

    /// Spawns a process streaming the container's output to the terminal.
    fn follow_logs(&self, container_id: &str) -> Result<Child, RunError>;

    /// Force-removes the container. A container that is already gone counts
    /// as removed.
    async fn remove(&self, container_id: &str) -> Result<(), RunError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args).stdin(Stdio::null());
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> RunError {
        RunError::Spawn {
            program: self.binary.clone(),
            source,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build(
        &self,
        dir: &Path,
        tag: &str,
        vars: &EnvironmentVariableSet,
    ) -> Result<(), RunError> {
        let status = self
            .command(&build_args(dir, tag, vars))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(RunError::ImageBuild {
                image: tag.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn start(
        &self,
        tag: &str,
        ports: &PortMapping,
        vars: &EnvironmentVariableSet,
    ) -> Result<String, RunError> {
        let output = self
            .command(&run_args(tag, ports, vars))
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(RunError::ContainerStart {
                image: tag.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(RunError::ContainerStart {
                image: tag.to_string(),
                message: "runtime did not report a container id".to_string(),
            });
        }
        Ok(container_id)
    }

    fn follow_logs(&self, container_id: &str) -> Result<Child, RunError> {
        self.command(&[
            "logs".to_string(),
            "-f".to_string(),
            container_id.to_string(),
        ])
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| self.spawn_error(e))
    }

    async fn remove(&self, container_id: &str) -> Result<(), RunError> {
        let output = self
            .command(&["rm".to_string(), "-f".to_string(), container_id.to_string()])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            debug!("Container {} was already gone", container_id);
            return Ok(());
        }

        Err(RunError::ContainerRemoval {
            container_id: container_id.to_string(),
            message: stderr.trim().to_string(),
        })
    }
}

/// Removes the container at most once, from whichever of the signal hook or
/// the post-wait cleanup gets there first.
struct ContainerGuard<'a> {
    runtime: &'a dyn ContainerRuntime,
    container_id: String,
    removed: AtomicBool,
    interrupted: AtomicBool,
    failure: Mutex<Option<RunError>>,
}

impl<'a> ContainerGuard<'a> {
    fn new(runtime: &'a dyn ContainerRuntime, container_id: String) -> Self {
        Self {
            runtime,
            container_id,
            removed: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    async fn remove_once(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Removing container {}", self.container_id);
        if let Err(e) = self.runtime.remove(&self.container_id).await {
            warn!("{}", e);
            if let Ok(mut slot) = self.failure.lock() {
                *slot = Some(e);
            }
        }
    }

    fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    async fn finish(self) -> Result<(), RunError> {
        self.remove_once().await;
        let failure = self
            .failure
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<'a> SignalHook for ContainerGuard<'a> {
    async fn on_signal(&self, signal: Interrupt) {
        debug!("{} received, removing container {}", signal.name(), self.container_id);
        self.interrupted.store(true, Ordering::SeqCst);
        self.remove_once().await;
    }
}

/// Where the image comes from and how it is named.
#[derive(Debug, Clone)]
pub struct ContainerTarget<'a> {
    pub dir: &'a Path,
    pub project_name: &'a str,
    pub environment_name: &'a str,
}

pub struct ContainerRunner<'a> {
    runtime: &'a dyn ContainerRuntime,
    port_start: u16,
    port_range: u16,
}

impl<'a> ContainerRunner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, port_start: u16, port_range: u16) -> Self {
        Self {
            runtime,
            port_start,
            port_range,
        }
    }

    /// Builds, starts and follows the container. Once a container has been
    /// started it is removed before this returns, whatever the outcome.
    #[instrument(skip_all, fields(project = target.project_name, environment = target.environment_name))]
    pub async fn run(
        &self,
        target: &ContainerTarget<'_>,
        vars: &EnvironmentVariableSet,
        listener: &mut SignalListener,
    ) -> Result<(), RunError> {
        let tag = image_tag(target.project_name, target.environment_name);

        ui::progress(&format!("Building {} from {}...", tag, BUILD_DESCRIPTOR));
        signal::interruptible(listener, self.runtime.build(target.dir, &tag, vars)).await?;
        ui::success(&format!("Built {}", tag));

        let external = find_available_port(self.port_start, self.port_range)?;
        let ports = PortMapping::resolve(vars, external);
        debug!("Publishing {}", ports.publish_spec());

        let container_id = self.runtime.start(&tag, &ports, vars).await?;
        info!("Started container {}", container_id);
        let guard = ContainerGuard::new(self.runtime, container_id.clone());

        let logs = match self.runtime.follow_logs(&container_id) {
            Ok(logs) => logs,
            Err(e) => return merge_cleanup(Err(e), guard.finish().await),
        };
        ui::success(&format!("Running at {}:{}", LOOPBACK, ports.external));

        let mut handle = ExecutionHandle::Container {
            container_id: container_id.clone(),
            logs,
        };
        let waited = signal::bridge(&mut handle, listener, Some(&guard)).await;

        let outcome = waited.and_then(|status| {
            if status.success() || guard.was_interrupted() || is_interrupt_exit(&status) {
                debug!("Log stream for {} ended ({})", container_id, status);
                Ok(())
            } else {
                Err(RunError::LogStream {
                    container_id: container_id.clone(),
                    status,
                })
            }
        });

        merge_cleanup(outcome, guard.finish().await)
    }
}
