//! Splits the raw `run` arguments into overrides and the pass-through command.

use tracing::warn;

use crate::error::RunError;

const ENVIRONMENT_PREFIX: &str = "--environment=";
const SERVICE_PREFIX: &str = "--service=";
const EPHEMERAL_FLAG: &str = "--ephemeral";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Command and its arguments, untouched apart from the removed overrides.
    pub command: Vec<String>,
    pub environment: Option<String>,
    pub service: Option<String>,
    pub ephemeral: bool,
}

impl RunRequest {
    /// Override tokens may appear anywhere; a repeated override replaces the
    /// earlier value.
    pub fn parse<I, S>(raw_args: I) -> Result<Self, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = RunRequest::default();

        for arg in raw_args {
            let arg = arg.into();

            if let Some(name) = arg.strip_prefix(ENVIRONMENT_PREFIX) {
                if name.is_empty() {
                    return Err(RunError::MissingEnvironmentName);
                }
                replace_override(&mut request.environment, name, "environment");
            } else if let Some(name) = arg.strip_prefix(SERVICE_PREFIX) {
                if name.is_empty() {
                    return Err(RunError::MissingServiceName);
                }
                replace_override(&mut request.service, name, "service");
            } else if arg == EPHEMERAL_FLAG {
                request.ephemeral = true;
            } else {
                request.command.push(arg);
            }
        }

        Ok(request)
    }
}

fn replace_override(slot: &mut Option<String>, value: &str, kind: &str) {
    if let Some(previous) = slot.replace(value.to_string()) {
        warn!(
            "{} override given more than once; using '{}' instead of '{}'",
            kind, value, previous
        );
    }
}
