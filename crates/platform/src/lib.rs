//! Remote records and the contract the run orchestrator consumes.
//!
//! The [`Platform`] trait is the only seam between local execution and the
//! hosted project/environment service. [`HttpPlatformClient`] is a thin JSON
//! adapter over it; tests substitute their own implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod variables;

pub use http::HttpPlatformClient;
pub use variables::EnvironmentVariableSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEphemeralEnvironmentRequest {
    pub name: String,
    #[serde(skip)]
    pub project_id: String,
    pub base_environment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEnvironmentRequest {
    pub environment_id: String,
    pub project_id: String,
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Request to {url} failed: {message}")]
    RequestFailed { url: String, message: String },

    #[error("Unauthorized ({status}). Log in again or check RAILWAY_TOKEN")]
    Unauthorized { status: u16 },

    #[error("Project {project_id} not found")]
    ProjectNotFound { project_id: String },

    #[error("Environment {name} not found")]
    EnvironmentNotFound { name: String },

    #[error("Unexpected status {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Platform client configuration error: {message}")]
    ConfigError { message: String },
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn project(&self, project_id: &str) -> Result<Project, PlatformError>;

    async fn environment(
        &self,
        project_id: &str,
        environment_id: &str,
    ) -> Result<Environment, PlatformError>;

    async fn environment_by_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Environment, PlatformError>;

    async fn create_ephemeral_environment(
        &self,
        request: &CreateEphemeralEnvironmentRequest,
    ) -> Result<Environment, PlatformError>;

    async fn delete_environment(
        &self,
        request: &DeleteEnvironmentRequest,
    ) -> Result<(), PlatformError>;

    async fn environment_variables(
        &self,
        project_id: &str,
        environment: &Environment,
        service: Option<&str>,
    ) -> Result<EnvironmentVariableSet, PlatformError>;
}
