use std::future::Future;
use tracing::{debug, instrument};

use platform::{CreateEphemeralEnvironmentRequest, DeleteEnvironmentRequest, Environment, Platform};

use crate::error::{merge_cleanup, RunError};
use crate::ui;

pub const EPHEMERAL_SUFFIX: &str = "-ephemeral";

pub fn ephemeral_name(base: &str) -> String {
    format!("{}{}", base, EPHEMERAL_SUFFIX)
}

pub struct EphemeralEnvironmentManager<'a> {
    platform: &'a dyn Platform,
    project_id: &'a str,
}

impl<'a> EphemeralEnvironmentManager<'a> {
    pub fn new(platform: &'a dyn Platform, project_id: &'a str) -> Self {
        Self {
            platform,
            project_id,
        }
    }

    /// Runs `run` against `base`, or, when `requested`, against a fresh
    /// environment derived from it that is deleted afterwards whether or not
    /// `run` succeeded.
    #[instrument(skip(self, base, run), fields(base = %base.name))]
    pub async fn with_ephemeral<T, F, Fut>(
        &self,
        base: Environment,
        requested: bool,
        run: F,
    ) -> Result<T, RunError>
    where
        F: FnOnce(Environment) -> Fut,
        Fut: Future<Output = Result<T, RunError>>,
    {
        if !requested {
            return run(base).await;
        }

        let name = ephemeral_name(&base.name);
        ui::progress(&format!("Spinning up Ephemeral Environment: {}", name));
        let environment = self
            .platform
            .create_ephemeral_environment(&CreateEphemeralEnvironmentRequest {
                name,
                project_id: self.project_id.to_string(),
                base_environment_id: base.id,
            })
            .await?;
        ui::success("Done!");
        debug!("Ephemeral environment {} ({})", environment.name, environment.id);

        let result = run(environment.clone()).await;

        ui::progress("Tearing down ephemeral environment...");
        let teardown = self
            .platform
            .delete_environment(&DeleteEnvironmentRequest {
                environment_id: environment.id.clone(),
                project_id: self.project_id.to_string(),
            })
            .await
            .map_err(|source| RunError::EphemeralTeardown {
                name: environment.name.clone(),
                source,
            });
        if teardown.is_ok() {
            ui::success("Done!");
        }

        merge_cleanup(result, teardown)
    }
}
