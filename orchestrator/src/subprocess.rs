use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tracing::{debug, instrument};

use platform::EnvironmentVariableSet;

use crate::error::RunError;
use crate::signal::{self, ExecutionHandle, SignalListener};

/// The child's environment: everything inherited, with injected variables
/// replacing inherited ones of the same name.
pub fn merged_environment<I>(
    inherited: I,
    vars: &EnvironmentVariableSet,
) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut merged: Vec<(OsString, OsString)> = inherited
        .into_iter()
        .filter(|(name, _)| !name.to_str().is_some_and(|name| vars.contains(name)))
        .collect();
    merged.extend(
        vars.iter()
            .map(|(name, value)| (OsString::from(name), OsString::from(value))),
    );
    merged
}

pub fn spawn(
    command: &[String],
    vars: &EnvironmentVariableSet,
    cwd: &Path,
) -> Result<ExecutionHandle, RunError> {
    let (program, args) = command.split_first().ok_or_else(|| RunError::NoCommandSpecified {
        dir: cwd.to_path_buf(),
    })?;

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(merged_environment(std::env::vars_os(), vars))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

    debug!("Started {} (pid {:?})", program, child.id());
    Ok(ExecutionHandle::Subprocess {
        program: program.clone(),
        child,
    })
}

/// Runs `command` to completion, forwarding host signals to it.
#[instrument(skip(vars, listener), fields(vars = vars.len()))]
pub async fn run(
    command: &[String],
    vars: &EnvironmentVariableSet,
    cwd: &Path,
    listener: &mut SignalListener,
) -> Result<ExitStatus, RunError> {
    let mut handle = spawn(command, vars, cwd)?;
    signal::bridge(&mut handle, listener, None).await
}
