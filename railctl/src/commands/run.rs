use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::debug;

use config_loader::{ConfigManager, Settings};
use orchestrator::{ui, DockerCli, RunOrchestrator};
use platform::HttpPlatformClient;

/// Runs the wrapped program and returns the exit code the CLI should end with.
pub async fn run(args: Vec<String>) -> Result<i32> {
    let cwd = std::env::current_dir()
        .map_err(|e| anyhow!("Failed to determine the working directory: {}", e))?;
    let settings = Settings::from_env()?;
    let config = ConfigManager::new()?;
    debug!(
        "Using API {} and config {}",
        settings.api_url,
        config.root_config_path().display()
    );

    let token = config.token()?;
    let platform = Arc::new(HttpPlatformClient::new(&settings.api_url, &token)?);
    let runtime = Arc::new(DockerCli::new(settings.container_runtime));

    let outcome = RunOrchestrator::new(config, platform, runtime)
        .execute(args, &cwd)
        .await?;

    if outcome.success() {
        ui::notice(ui::CLOSING_MESSAGE);
    }
    Ok(outcome.exit_code)
}
