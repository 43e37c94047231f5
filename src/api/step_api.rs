//! Transport for the remote step REST API.
//!
//! Endpoints, all authenticated by the `apiKey` query parameter:
//! - `GET    /projects/{projectId}/steps/`
//! - `GET    /projects/{projectId}/steps/{stepId}`
//! - `POST   /projects/{projectId}/steps/` (body: array of step objects)
//! - `PATCH  /projects/{projectId}/steps/{stepId}` (body: full step object)
//! - `DELETE /projects/{projectId}/steps/{stepId}`
//!
//! Per-step URLs carry no trailing slash; some deployments answer the
//! slash form with 404, which a delete would read as "already absent".

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{Map, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::ApiError;
use super::types::RemoteStep;
use crate::config::ApiConfig;

pub(crate) const PROVIDER_NAME: &str = "steps";

/// Raw access to the remote step endpoints.
///
/// Implementations report transport failures as `ApiError`; interpretation
/// (verification after failure, 404-tolerant delete) lives in
/// [`RemoteStepClient`](super::RemoteStepClient).
#[async_trait]
pub trait StepApi: Send + Sync {
    /// Provider name used in errors and logs
    fn name(&self) -> &str;

    /// All steps of a project, job and process steps alike
    async fn list_steps(&self, project_id: &str) -> Result<Vec<RemoteStep>, ApiError>;

    /// One step as a raw object, suitable for a full-object PATCH
    async fn get_step(
        &self,
        project_id: &str,
        step_id: &str,
    ) -> Result<Map<String, Value>, ApiError>;

    /// POST an array of step payloads; returns the response body (a list,
    /// a single object, or `Null` for an empty body)
    async fn create_steps(
        &self,
        project_id: &str,
        payload: Vec<Map<String, Value>>,
    ) -> Result<Value, ApiError>;

    /// PATCH a full step object
    async fn patch_step(
        &self,
        project_id: &str,
        step_id: &str,
        object: Map<String, Value>,
    ) -> Result<(), ApiError>;

    async fn delete_step(&self, project_id: &str, step_id: &str) -> Result<(), ApiError>;
}

/// reqwest-backed implementation
pub struct HttpStepApi {
    base_url: String,
    api_key: String,
    client: Client,
}

impl HttpStepApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ApiError::not_configured(PROVIDER_NAME, e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build from the `[api]` config section; the key is read from the
    /// environment variable named by `api_key_env`
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        if config.base_url.trim().is_empty() {
            return Err(ApiError::not_configured(PROVIDER_NAME, "api.base_url is empty"));
        }
        let api_key = env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ApiError::not_configured(
                    PROVIDER_NAME,
                    format!("environment variable {} is not set", config.api_key_env),
                )
            })?;
        Self::new(
            &config.base_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
            config.accept_invalid_certs,
        )
    }

    fn steps_url(&self, project_id: &str) -> String {
        format!("{}/projects/{}/steps/", self.base_url, project_id)
    }

    fn step_url(&self, project_id: &str, step_id: &str) -> String {
        format!("{}/projects/{}/steps/{}", self.base_url, project_id, step_id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.client
            .request(method, url)
            .query(&[("apiKey", self.api_key.as_str())])
            .header("Accept", "application/json")
    }

    /// Send a request and map non-success statuses; returns the body text
    async fn send(&self, request: RequestBuilder, resource: &str) -> Result<String, ApiError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::network(PROVIDER_NAME, format!("timed out: {}", e))
            } else {
                ApiError::network(PROVIDER_NAME, e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(PROVIDER_NAME, e.to_string()))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(500).collect();
            warn!(
                status = status.as_u16(),
                resource = resource,
                "Step API returned error: {}",
                snippet
            );
            return Err(ApiError::from_status(
                PROVIDER_NAME,
                status.as_u16(),
                resource,
                snippet,
            ));
        }
        Ok(body)
    }

    fn parse_body(body: &str) -> Result<Value, ApiError> {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(body)
            .map_err(|e| ApiError::decode(PROVIDER_NAME, format!("Parse error: {}", e)))
    }
}

#[async_trait]
impl StepApi for HttpStepApi {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn list_steps(&self, project_id: &str) -> Result<Vec<RemoteStep>, ApiError> {
        let url = self.steps_url(project_id);
        let body = self
            .send(self.request(Method::GET, &url), &format!("project {}", project_id))
            .await?;
        match Self::parse_body(&body)? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value(item)
                        .map_err(|e| ApiError::decode(PROVIDER_NAME, e.to_string()))
                })
                .collect(),
            other => Err(ApiError::decode(
                PROVIDER_NAME,
                format!("expected a list of steps, got {}", type_name(&other)),
            )),
        }
    }

    async fn get_step(
        &self,
        project_id: &str,
        step_id: &str,
    ) -> Result<Map<String, Value>, ApiError> {
        let url = self.step_url(project_id, step_id);
        let body = self
            .send(self.request(Method::GET, &url), &format!("step {}", step_id))
            .await?;
        match Self::parse_body(&body)? {
            Value::Object(object) => Ok(object),
            other => Err(ApiError::decode(
                PROVIDER_NAME,
                format!("expected a step object, got {}", type_name(&other)),
            )),
        }
    }

    async fn create_steps(
        &self,
        project_id: &str,
        payload: Vec<Map<String, Value>>,
    ) -> Result<Value, ApiError> {
        let url = self.steps_url(project_id);
        let body = self
            .send(
                self.request(Method::POST, &url).json(&payload),
                &format!("project {}", project_id),
            )
            .await?;
        Self::parse_body(&body)
    }

    async fn patch_step(
        &self,
        project_id: &str,
        step_id: &str,
        object: Map<String, Value>,
    ) -> Result<(), ApiError> {
        let url = self.step_url(project_id, step_id);
        self.send(
            self.request(Method::PATCH, &url).json(&object),
            &format!("step {}", step_id),
        )
        .await?;
        Ok(())
    }

    async fn delete_step(&self, project_id: &str, step_id: &str) -> Result<(), ApiError> {
        let url = self.step_url(project_id, step_id);
        self.send(
            self.request(Method::DELETE, &url),
            &format!("step {}", step_id),
        )
        .await?;
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let api = HttpStepApi::new(
            "https://arkite.example/api/v1/",
            "key",
            Duration::from_secs(10),
            false,
        )
        .unwrap();
        assert_eq!(
            api.steps_url("p1"),
            "https://arkite.example/api/v1/projects/p1/steps/"
        );
        assert_eq!(
            api.step_url("p1", "42"),
            "https://arkite.example/api/v1/projects/p1/steps/42"
        );
        assert!(!api.step_url("p1", "42").ends_with('/'));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(HttpStepApi::parse_body("").unwrap(), Value::Null);
        assert_eq!(HttpStepApi::parse_body("  \n").unwrap(), Value::Null);
        assert!(HttpStepApi::parse_body("[{\"Id\": 1}]").unwrap().is_array());
        assert!(matches!(
            HttpStepApi::parse_body("<html>"),
            Err(ApiError::Decode { .. })
        ));
    }

    #[test]
    fn test_from_config_requires_base_url() {
        let config = ApiConfig {
            base_url: String::new(),
            ..ApiConfig::default()
        };
        let err = HttpStepApi::from_config(&config).err().unwrap();
        assert!(matches!(err, ApiError::NotConfigured { .. }));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ApiConfig {
            base_url: "https://arkite.example/api/v1".into(),
            api_key_env: "STEPSYNC_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ApiConfig::default()
        };
        let err = HttpStepApi::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("STEPSYNC_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
