#![cfg(unix)]

use async_trait::async_trait;
use config_loader::ConfigManager;
use orchestrator::container::PortMapping;
use orchestrator::{ContainerRuntime, Interrupt, RunError, RunOrchestrator, SignalListener};
use platform::{
    CreateEphemeralEnvironmentRequest, DeleteEnvironmentRequest, Environment,
    EnvironmentVariableSet, Platform, PlatformError, Project,
};
use serde_json::json;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;

/// Sender side of the listener handed to the most recent run.
type InterruptSlot = Arc<Mutex<Option<UnboundedSender<Interrupt>>>>;

fn send_interrupt(slot: &InterruptSlot) {
    if let Some(tx) = slot.lock().unwrap().as_ref() {
        tx.send(Interrupt::Interrupt).unwrap();
    }
}

#[derive(Default)]
struct FakePlatform {
    calls: Mutex<Vec<String>>,
    variables: Vec<(String, String)>,
    stall_variables: Option<InterruptSlot>,
}

impl FakePlatform {
    fn with_variables(pairs: &[(&str, &str)]) -> Self {
        Self {
            variables: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    /// The variables fetch hangs after the user presses ctrl-c.
    fn stalling_variables(mut self, slot: &InterruptSlot) -> Self {
        self.stall_variables = Some(slot.clone());
        self
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn project(&self, project_id: &str) -> Result<Project, PlatformError> {
        self.record(format!("project {}", project_id));
        Ok(Project {
            id: project_id.to_string(),
            name: "My App!".to_string(),
        })
    }

    async fn environment(
        &self,
        _project_id: &str,
        environment_id: &str,
    ) -> Result<Environment, PlatformError> {
        self.record(format!("environment {}", environment_id));
        Ok(Environment {
            id: environment_id.to_string(),
            name: "production".to_string(),
        })
    }

    async fn environment_by_name(
        &self,
        _project_id: &str,
        name: &str,
    ) -> Result<Environment, PlatformError> {
        self.record(format!("environment_by_name {}", name));
        Ok(Environment {
            id: format!("id-{}", name),
            name: name.to_string(),
        })
    }

    async fn create_ephemeral_environment(
        &self,
        request: &CreateEphemeralEnvironmentRequest,
    ) -> Result<Environment, PlatformError> {
        self.record(format!("create {}", request.name));
        Ok(Environment {
            id: "eph-1".to_string(),
            name: request.name.clone(),
        })
    }

    async fn delete_environment(
        &self,
        request: &DeleteEnvironmentRequest,
    ) -> Result<(), PlatformError> {
        self.record(format!("delete {}", request.environment_id));
        Ok(())
    }

    async fn environment_variables(
        &self,
        _project_id: &str,
        environment: &Environment,
        service: Option<&str>,
    ) -> Result<EnvironmentVariableSet, PlatformError> {
        self.record(format!(
            "variables {} {}",
            environment.id,
            service.unwrap_or("-")
        ));
        if let Some(slot) = &self.stall_variables {
            send_interrupt(slot);
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self.variables.iter().cloned().collect())
    }
}

struct FakeRuntime {
    logs_command: Vec<&'static str>,
    fail_build: bool,
    interrupts: Option<(InterruptSlot, usize)>,
    builds: Mutex<Vec<String>>,
    started: Mutex<Vec<PortMapping>>,
    removals: AtomicUsize,
}

impl FakeRuntime {
    fn following(logs_command: &[&'static str]) -> Self {
        Self {
            logs_command: logs_command.to_vec(),
            fail_build: false,
            interrupts: None,
            builds: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            removals: AtomicUsize::new(0),
        }
    }

    fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    /// Presses ctrl-c `times` times once the log stream is running.
    fn interrupted(mut self, slot: &InterruptSlot, times: usize) -> Self {
        self.interrupts = Some((slot.clone(), times));
        self
    }

    fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build(
        &self,
        _dir: &Path,
        tag: &str,
        _vars: &EnvironmentVariableSet,
    ) -> Result<(), RunError> {
        self.builds.lock().unwrap().push(tag.to_string());
        if self.fail_build {
            return Err(RunError::ImageBuild {
                image: tag.to_string(),
                status: ExitStatus::from_raw(1 << 8),
            });
        }
        Ok(())
    }

    async fn start(
        &self,
        _tag: &str,
        ports: &PortMapping,
        _vars: &EnvironmentVariableSet,
    ) -> Result<String, RunError> {
        self.started.lock().unwrap().push(ports.clone());
        Ok("container-1".to_string())
    }

    fn follow_logs(&self, _container_id: &str) -> Result<Child, RunError> {
        let logs = Command::new(self.logs_command[0])
            .args(&self.logs_command[1..])
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: self.logs_command[0].to_string(),
                source,
            })?;
        if let Some((slot, times)) = &self.interrupts {
            for _ in 0..*times {
                send_interrupt(slot);
            }
        }
        Ok(logs)
    }

    async fn remove(&self, _container_id: &str) -> Result<(), RunError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Workspace {
    _config_dir: TempDir,
    project_dir: TempDir,
    config: ConfigManager,
}

fn linked_workspace() -> Workspace {
    let config_dir = TempDir::new().unwrap();
    let project_dir = TempDir::new().unwrap();
    let project_path = project_dir.path().to_string_lossy().to_string();

    let root = json!({
        "user": { "token": "t" },
        "projects": {
            project_path.clone(): {
                "projectPath": project_path,
                "project": "proj-1",
                "environment": "env-1"
            }
        }
    });
    let config_path = config_dir.path().join("config.json");
    fs::write(&config_path, root.to_string()).unwrap();

    Workspace {
        _config_dir: config_dir,
        project_dir,
        config: ConfigManager::with_path(config_path),
    }
}

fn quiet_signals() -> std::io::Result<SignalListener> {
    let (_tx, listener) = SignalListener::channel();
    Ok(listener)
}

/// Listeners whose senders stay reachable through the returned slot.
fn shared_signals() -> (
    InterruptSlot,
    impl Fn() -> std::io::Result<SignalListener> + Send + Sync + 'static,
) {
    let slot: InterruptSlot = Arc::default();
    let factory_slot = slot.clone();
    let factory = move || {
        let (tx, listener) = SignalListener::channel();
        *factory_slot.lock().unwrap() = Some(tx);
        Ok(listener)
    };
    (slot, factory)
}

fn orchestrator(
    workspace: &Workspace,
    platform: &Arc<FakePlatform>,
    runtime: &Arc<FakeRuntime>,
) -> RunOrchestrator {
    RunOrchestrator::new(
        ConfigManager::with_path(workspace.config.root_config_path().to_path_buf()),
        platform.clone(),
        runtime.clone(),
    )
    .with_signals(quiet_signals)
}

#[tokio::test]
async fn subprocess_exit_code_is_propagated() {
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(["sh", "-c", "exit 7"], workspace.project_dir.path())
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 7);
    assert_eq!(
        platform.calls(),
        vec!["environment env-1".to_string(), "variables env-1 -".to_string()]
    );
}

#[tokio::test]
async fn injected_variable_beats_inherited_one() {
    std::env::set_var("RAILCTL_SPEC_FOO", "bar");
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::with_variables(&[("RAILCTL_SPEC_FOO", "baz")]));
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(
            ["sh", "-c", "test \"$RAILCTL_SPEC_FOO\" = baz"],
            workspace.project_dir.path(),
        )
        .await
        .unwrap();

    assert!(outcome.success());
}

#[tokio::test]
async fn overrides_select_environment_and_service() {
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(
            ["--service=api", "true", "--environment=staging"],
            workspace.project_dir.path(),
        )
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(
        platform.calls(),
        vec![
            "environment_by_name staging".to_string(),
            "variables id-staging api".to_string()
        ]
    );
}

#[tokio::test]
async fn ephemeral_environment_is_torn_down_after_failing_run() {
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(
            ["--ephemeral", "sh", "-c", "exit 3"],
            workspace.project_dir.path(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 3);
    assert_eq!(platform.count("create"), 1);
    assert_eq!(platform.count("delete"), 1);
    assert_eq!(
        platform.calls(),
        vec![
            "environment env-1".to_string(),
            "create production-ephemeral".to_string(),
            "variables eph-1 -".to_string(),
            "delete eph-1".to_string(),
        ]
    );
}

#[tokio::test]
async fn ephemeral_environment_is_torn_down_when_command_cannot_start() {
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let result = orchestrator(&workspace, &platform, &runtime)
        .execute(
            ["--ephemeral", "railctl-spec-missing-binary"],
            workspace.project_dir.path(),
        )
        .await;

    assert!(matches!(result, Err(RunError::Spawn { .. })));
    assert_eq!(platform.count("create"), 1);
    assert_eq!(platform.count("delete"), 1);
    let calls = platform.calls();
    let created = calls.iter().position(|c| c.starts_with("create")).unwrap();
    let deleted = calls.iter().position(|c| c.starts_with("delete")).unwrap();
    assert!(created < deleted);
}

#[tokio::test]
async fn nothing_to_run_fails_before_any_remote_call() {
    let workspace = linked_workspace();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let result = orchestrator(&workspace, &platform, &runtime)
        .execute(["--ephemeral"], workspace.project_dir.path())
        .await;

    assert!(matches!(result, Err(RunError::NoCommandSpecified { .. })));
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn explicit_command_wins_over_dockerfile() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(["true"], workspace.project_dir.path())
        .await
        .unwrap();

    assert!(outcome.success());
    assert!(runtime.builds.lock().unwrap().is_empty());
    assert_eq!(runtime.removals(), 0);
}

#[tokio::test]
async fn container_run_builds_tagged_image_and_removes_container() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let platform = Arc::new(FakePlatform::with_variables(&[("PORT", "8080")]));
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .execute(Vec::<String>::new(), workspace.project_dir.path())
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(
        *runtime.builds.lock().unwrap(),
        vec!["railway-local/myapp-production:latest".to_string()]
    );
    let started = runtime.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].internal, "8080");
    assert_eq!(runtime.removals(), 1);
}

#[tokio::test]
async fn interrupt_during_container_run_is_clean() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let (slot, signals) = shared_signals();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["sleep", "30"]).interrupted(&slot, 1));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .with_signals(signals)
        .execute(Vec::<String>::new(), workspace.project_dir.path())
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(runtime.removals(), 1);
}

#[tokio::test]
async fn repeated_interrupts_remove_container_once() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let (slot, signals) = shared_signals();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["sleep", "30"]).interrupted(&slot, 2));

    let outcome = orchestrator(&workspace, &platform, &runtime)
        .with_signals(signals)
        .execute(Vec::<String>::new(), workspace.project_dir.path())
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(runtime.removals(), 1);
}

#[tokio::test]
async fn interrupt_while_fetching_variables_tears_down_ephemeral_environment() {
    let workspace = linked_workspace();
    let (slot, signals) = shared_signals();
    let platform = Arc::new(FakePlatform::default().stalling_variables(&slot));
    let runtime = Arc::new(FakeRuntime::following(&["true"]));

    let result = orchestrator(&workspace, &platform, &runtime)
        .with_signals(signals)
        .execute(["--ephemeral", "true"], workspace.project_dir.path())
        .await;

    assert!(matches!(
        result,
        Err(RunError::Interrupted {
            signal: Interrupt::Interrupt
        })
    ));
    assert_eq!(platform.count("create"), 1);
    assert_eq!(platform.count("delete"), 1);
    let calls = platform.calls();
    let created = calls.iter().position(|c| c.starts_with("create")).unwrap();
    let deleted = calls.iter().position(|c| c.starts_with("delete")).unwrap();
    assert!(created < deleted);
}

#[tokio::test]
async fn failed_build_starts_nothing_and_tears_down_ephemeral_environment() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["true"]).failing_build());

    let result = orchestrator(&workspace, &platform, &runtime)
        .execute(["--ephemeral"], workspace.project_dir.path())
        .await;

    assert!(matches!(result, Err(RunError::ImageBuild { .. })));
    assert!(runtime.started.lock().unwrap().is_empty());
    assert_eq!(runtime.removals(), 0);
    assert_eq!(platform.count("delete"), 1);
}

#[tokio::test]
async fn broken_log_stream_is_an_error_and_still_removes_container() {
    let workspace = linked_workspace();
    fs::write(workspace.project_dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
    let platform = Arc::new(FakePlatform::default());
    let runtime = Arc::new(FakeRuntime::following(&["sh", "-c", "exit 1"]));

    let result = orchestrator(&workspace, &platform, &runtime)
        .execute(["--ephemeral"], workspace.project_dir.path())
        .await;

    assert!(matches!(result, Err(RunError::LogStream { .. })));
    assert_eq!(runtime.removals(), 1);
    assert_eq!(platform.count("delete"), 1);
}
