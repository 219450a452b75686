use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub mod mode;
pub use mode::EnvMode;

pub const DEFAULT_API_URL: &str = "https://backboard.railway.app";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("JSON parsing failed: {message}")]
    JsonParsingFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Not logged in. Set RAILWAY_TOKEN or log in first")]
    NotLoggedIn,

    #[error("No project linked to {path}. Link a project to this directory first")]
    ProjectNotLinked { path: String },

    #[error("No active environment for project {project_id}. Select an environment or pass --environment=<name>")]
    NoActiveEnvironment { project_id: String },

    #[error("Invalid API URL {url}: must start with http:// or https://")]
    InvalidApiUrl { url: String },

    #[error("Could not determine home directory")]
    HomeDirUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default)]
    pub token: String,
}

/// A directory linked to a remote project, as stored in the root config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkedProject {
    pub project_path: PathBuf,
    pub project: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub projects: BTreeMap<String, LinkedProject>,
}

/// The link between a working directory and a remote project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub project_id: String,
    pub project_path: PathBuf,
    pub environment_id: Option<String>,
}

impl ProjectConfig {
    pub fn active_environment(&self) -> Result<&str, ConfigError> {
        self.environment_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigError::NoActiveEnvironment {
                project_id: self.project_id.clone(),
            })
    }
}

/// Settings that do not live in the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub container_runtime: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("RAILWAY_API_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(ConfigError::InvalidApiUrl { url: api_url });
        }

        let container_runtime = std::env::var("RAILCTL_CONTAINER_RUNTIME")
            .ok()
            .map(|val| val.trim().to_string())
            .filter(|val| !val.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string());

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            container_runtime,
        })
    }
}

pub struct ConfigManager {
    root_config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            root_config_path: Self::find_root_config_path()?,
        })
    }

    pub fn with_path(root_config_path: PathBuf) -> Self {
        Self { root_config_path }
    }

    pub fn root_config_path(&self) -> &Path {
        &self.root_config_path
    }

    fn find_root_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("RAILWAY_CONFIG_PATH") {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let home = dirs::home_dir().ok_or(ConfigError::HomeDirUnavailable)?;
        Ok(home
            .join(".railway")
            .join(EnvMode::from_env().config_file_name()))
    }

    #[instrument(skip(self))]
    pub fn load_root(&self) -> Result<RootConfig, ConfigError> {
        debug!("Loading root config from: {:?}", self.root_config_path);

        if !self.root_config_path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: self.root_config_path.to_string_lossy().to_string(),
            });
        }

        let content =
            fs::read_to_string(&self.root_config_path).map_err(|e| ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::JsonParsingFailed {
            message: e.to_string(),
        })
    }

    /// Token for the remote API; `RAILWAY_TOKEN` takes precedence over the stored login.
    pub fn token(&self) -> Result<String, ConfigError> {
        if let Ok(token) = std::env::var("RAILWAY_TOKEN") {
            if !token.trim().is_empty() {
                return Ok(token);
            }
        }

        match self.load_root() {
            Ok(root) if !root.user.token.is_empty() => Ok(root.user.token),
            Ok(_) | Err(ConfigError::ConfigFileNotFound { .. }) => Err(ConfigError::NotLoggedIn),
            Err(e) => Err(e),
        }
    }

    /// Finds the project linked to `cwd` or to its closest linked ancestor.
    #[instrument(skip(self))]
    pub fn project_config(&self, cwd: &Path) -> Result<ProjectConfig, ConfigError> {
        let root = match self.load_root() {
            Ok(root) => root,
            Err(ConfigError::ConfigFileNotFound { .. }) => RootConfig::default(),
            Err(e) => return Err(e),
        };

        find_linked_project(&root, cwd).ok_or_else(|| ConfigError::ProjectNotLinked {
            path: cwd.to_string_lossy().to_string(),
        })
    }
}

fn find_linked_project(root: &RootConfig, cwd: &Path) -> Option<ProjectConfig> {
    for dir in cwd.ancestors() {
        let key = dir.to_string_lossy();
        if let Some(linked) = root.projects.get(key.as_ref()) {
            debug!("Found linked project {} at {}", linked.project, key);
            return Some(ProjectConfig {
                project_id: linked.project.clone(),
                project_path: linked.project_path.clone(),
                environment_id: linked.environment.clone(),
            });
        }
    }
    None
}
