use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    CreateEphemeralEnvironmentRequest, DeleteEnvironmentRequest, Environment,
    EnvironmentVariableSet, Platform, PlatformError, Project,
};

pub struct HttpPlatformClient {
    client: Client,
    base_api: Url,
}

impl HttpPlatformClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, PlatformError> {
        let base_api = resolve_api_url(api_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("railctl"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let auth_header = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_header).map_err(|_| PlatformError::ConfigError {
                message: "Token contains characters not allowed in a header".to_string(),
            })?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PlatformError::ConfigError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, base_api })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PlatformError> {
        let mut url = self.base_api.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::ConfigError {
                message: format!("API URL {} cannot be a base", self.base_api),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        not_found: impl FnOnce() -> PlatformError,
    ) -> Result<T, PlatformError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| request_failed(&url, e))?;
        let response = check_status(&url, response, not_found).await?;
        decode(&url, response).await
    }
}

#[async_trait]
impl Platform for HttpPlatformClient {
    #[instrument(skip(self))]
    async fn project(&self, project_id: &str) -> Result<Project, PlatformError> {
        let url = self.endpoint(&["v1", "projects", project_id])?;
        self.get_json(url, || PlatformError::ProjectNotFound {
            project_id: project_id.to_string(),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn environment(
        &self,
        project_id: &str,
        environment_id: &str,
    ) -> Result<Environment, PlatformError> {
        let url = self.endpoint(&["v1", "projects", project_id, "environments", environment_id])?;
        self.get_json(url, || PlatformError::EnvironmentNotFound {
            name: environment_id.to_string(),
        })
        .await
    }

    #[instrument(skip(self))]
    async fn environment_by_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Environment, PlatformError> {
        let mut url = self.endpoint(&["v1", "projects", project_id, "environments"])?;
        url.query_pairs_mut().append_pair("name", name);

        let environments: Vec<Environment> = self
            .get_json(url, || PlatformError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
            .await?;

        environments
            .into_iter()
            .find(|environment| environment.name == name)
            .ok_or_else(|| PlatformError::EnvironmentNotFound {
                name: name.to_string(),
            })
    }

    #[instrument(skip(self), fields(name = %request.name))]
    async fn create_ephemeral_environment(
        &self,
        request: &CreateEphemeralEnvironmentRequest,
    ) -> Result<Environment, PlatformError> {
        let url = self.endpoint(&["v1", "projects", &request.project_id, "environments"])?;
        let body = CreateEnvironmentBody {
            request,
            ephemeral: true,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(&url, e))?;
        let response = check_status(&url, response, || PlatformError::ProjectNotFound {
            project_id: request.project_id.clone(),
        })
        .await?;

        let environment: Environment = decode(&url, response).await?;
        debug!("Created environment {} ({})", environment.name, environment.id);
        Ok(environment)
    }

    #[instrument(skip(self))]
    async fn delete_environment(
        &self,
        request: &DeleteEnvironmentRequest,
    ) -> Result<(), PlatformError> {
        let url = self.endpoint(&[
            "v1",
            "projects",
            &request.project_id,
            "environments",
            &request.environment_id,
        ])?;

        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| request_failed(&url, e))?;
        check_status(&url, response, || PlatformError::EnvironmentNotFound {
            name: request.environment_id.clone(),
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, environment), fields(environment = %environment.name))]
    async fn environment_variables(
        &self,
        project_id: &str,
        environment: &Environment,
        service: Option<&str>,
    ) -> Result<EnvironmentVariableSet, PlatformError> {
        let mut url = self.endpoint(&[
            "v1",
            "projects",
            project_id,
            "environments",
            &environment.id,
            "variables",
        ])?;
        if let Some(service) = service {
            url.query_pairs_mut().append_pair("service", service);
        }

        let response: VariablesResponse = self
            .get_json(url, || PlatformError::EnvironmentNotFound {
                name: environment.name.clone(),
            })
            .await?;
        debug!("Fetched {} variables", response.variables.len());
        Ok(response.variables)
    }
}

fn resolve_api_url(api_url: &str) -> Result<Url, PlatformError> {
    let mut base_api = Url::parse(api_url).map_err(|e| PlatformError::ConfigError {
        message: format!("Invalid API URL {}: {}", api_url, e),
    })?;

    let current_path = base_api.path().to_string();
    if !current_path.ends_with('/') {
        base_api.set_path(&format!("{}/", current_path));
    }

    Ok(base_api)
}

fn request_failed(url: &Url, err: reqwest::Error) -> PlatformError {
    PlatformError::RequestFailed {
        url: url.to_string(),
        message: err.to_string(),
    }
}

async fn check_status(
    url: &Url,
    response: Response,
    not_found: impl FnOnce() -> PlatformError,
) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PlatformError::Unauthorized {
            status: status.as_u16(),
        }),
        StatusCode::NOT_FOUND => Err(not_found()),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(PlatformError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, PlatformError> {
    response
        .json()
        .await
        .map_err(|e| PlatformError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateEnvironmentBody<'a> {
    #[serde(flatten)]
    request: &'a CreateEphemeralEnvironmentRequest,
    ephemeral: bool,
}

#[derive(Debug, Deserialize)]
struct VariablesResponse {
    #[serde(default)]
    variables: EnvironmentVariableSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_url_appends_trailing_slash() {
        let url = resolve_api_url("https://api.example.org/backboard").unwrap();
        assert_eq!(url.as_str(), "https://api.example.org/backboard/");
    }

    #[test]
    fn endpoint_joins_segments_under_base_path() {
        let client = HttpPlatformClient::new("https://api.example.org/base", "t").unwrap();
        let url = client
            .endpoint(&["v1", "projects", "p 1", "environments"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.org/base/v1/projects/p%201/environments"
        );
    }

    #[test]
    fn create_body_flattens_request() {
        let request = CreateEphemeralEnvironmentRequest {
            name: "production-ephemeral".to_string(),
            project_id: "p1".to_string(),
            base_environment_id: "e1".to_string(),
        };
        let body = serde_json::to_value(CreateEnvironmentBody {
            request: &request,
            ephemeral: true,
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "name": "production-ephemeral",
                "baseEnvironmentId": "e1",
                "ephemeral": true,
            })
        );
    }

    #[test]
    fn invalid_url_is_config_error() {
        assert!(matches!(
            HttpPlatformClient::new("not a url", "t"),
            Err(PlatformError::ConfigError { .. })
        ));
    }
}
