//! HTTP provider client.
//!
//! Talks to a REST generation service:
//! - `POST {base}/v1/generations` submits a prompt
//! - `GET  {base}/v1/generations/{task_id}` polls a task
//! - `GET  {base}/v1/account` reports whether the caller may submit
//!
//! Retries are not performed here. The generation job owns retry and
//! fallback policy, so every call makes exactly one request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, warn};

use vgen_models::QualityProfile;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{GenerationRequest, PendingStatus, Provider, TaskHandle, TaskPhase, TaskStatus};
use crate::types::{AccountResponse, ErrorBody, SubmitRequest, SubmitResponse, TaskResponse};

/// Configuration for an HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Name used in logs and asset records
    pub name: String,
    /// Base URL of the generation service
    pub base_url: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Longest clip the provider accepts
    pub max_duration_secs: u32,
    /// Profiles this provider serves
    pub supported_profiles: Vec<QualityProfile>,
    /// Query `/v1/account` before each submission
    pub check_account: bool,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_duration_secs: 60,
            supported_profiles: QualityProfile::ALL.to_vec(),
            check_account: false,
        }
    }
}

impl HttpProviderConfig {
    /// Create config from environment variables with the given prefix.
    ///
    /// Reads `{PREFIX}_URL`, `{PREFIX}_API_KEY`, `{PREFIX}_TIMEOUT_SECS`,
    /// `{PREFIX}_MAX_DURATION_SECS`, `{PREFIX}_PROFILES` (comma separated)
    /// and `{PREFIX}_CHECK_ACCOUNT`. Returns `None` when `{PREFIX}_URL` is unset.
    pub fn from_env(prefix: &str, name: &str) -> Option<Self> {
        let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();
        let base_url = var("URL")?;
        let defaults = Self::default();

        let supported_profiles = var("PROFILES")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|p| p.trim().parse::<QualityProfile>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|profiles| !profiles.is_empty())
            .unwrap_or(defaults.supported_profiles);

        Some(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: var("API_KEY"),
            timeout: Duration::from_secs(
                var("TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
            max_duration_secs: var("MAX_DURATION_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_duration_secs),
            supported_profiles,
            check_account: var("CHECK_ACCOUNT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_check_account(mut self, enabled: bool) -> Self {
        self.check_account = enabled;
        self
    }

    pub fn with_max_duration(mut self, secs: u32) -> Self {
        self.max_duration_secs = secs;
        self
    }
}

/// Provider backed by a REST generation service.
pub struct HttpProvider {
    http: Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpProviderConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Whether `location` is served by the provider API itself. Asset URLs
    /// usually point at a CDN or a presigned object store, which must not
    /// receive the API key.
    fn is_provider_origin(&self, location: &str) -> bool {
        match (Url::parse(&self.config.base_url), Url::parse(location)) {
            (Ok(base), Ok(target)) => {
                base.scheme() == target.scheme()
                    && base.host_str() == target.host_str()
                    && base.port_or_known_default() == target.port_or_known_default()
            }
            _ => false,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        self.dispatch(self.authorize(builder)).await
    }

    async fn dispatch(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(error_for_status(status, body.describe(status.as_str())))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.config.timeout.as_secs())
        } else {
            ProviderError::from(e)
        }
    }

    async fn check_account(&self) -> ProviderResult<()> {
        let response = self.send(self.http.get(self.url("/v1/account"))).await?;
        let account: AccountResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        if account.can_submit {
            Ok(())
        } else {
            Err(ProviderError::validation(
                account
                    .reason
                    .unwrap_or_else(|| "account is not allowed to submit".to_string()),
            ))
        }
    }
}

/// Map a non-2xx status to the error taxonomy.
fn error_for_status(status: StatusCode, detail: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::unauthorized(detail),
        StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::quota_exceeded(detail)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::validation(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout(0),
        s if s.is_server_error() => ProviderError::unavailable(format!("{}: {}", s, detail)),
        s => ProviderError::invalid_response(format!("unexpected status {}: {}", s, detail)),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn validate(&self, request: &GenerationRequest) -> ProviderResult<()> {
        if request.prompt.trim().is_empty() {
            return Err(ProviderError::validation("prompt text is empty"));
        }
        if request.duration_secs > self.config.max_duration_secs {
            return Err(ProviderError::validation(format!(
                "duration {}s exceeds provider maximum of {}s",
                request.duration_secs, self.config.max_duration_secs
            )));
        }
        if !self.config.supported_profiles.contains(&request.profile) {
            return Err(ProviderError::validation(format!(
                "profile '{}' is not supported by provider '{}'",
                request.profile, self.config.name
            )));
        }
        if self.config.check_account {
            self.check_account().await?;
        }
        Ok(())
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<TaskHandle> {
        let url = self.url("/v1/generations");
        debug!(provider = %self.config.name, url = %url, "Submitting generation request");

        let body = SubmitRequest {
            prompt: request.prompt.clone(),
            profile: request.profile,
            duration_secs: request.duration_secs,
        };
        let response = self.send(self.http.post(&url).json(&body)).await?;
        let submitted: SubmitResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        if submitted.task_id.is_empty() {
            return Err(ProviderError::invalid_response("empty task_id"));
        }
        Ok(TaskHandle::new(submitted.task_id))
    }

    async fn poll(&self, handle: &TaskHandle) -> ProviderResult<TaskStatus> {
        let url = self.url(&format!("/v1/generations/{}", handle.task_id));
        let response = self.send(self.http.get(&url)).await?;
        let task: TaskResponse = response.json().await.map_err(|e| self.transport_error(e))?;

        match task.status.as_str() {
            "queued" | "pending" => Ok(TaskStatus::Pending(PendingStatus {
                phase: TaskPhase::Queued,
                message: task.message,
                progress: task.progress,
            })),
            "running" | "processing" => Ok(TaskStatus::Pending(PendingStatus {
                phase: TaskPhase::Running,
                message: task.message,
                progress: task.progress,
            })),
            "succeeded" | "completed" => match task.video_url {
                Some(location) if !location.is_empty() => Ok(TaskStatus::Succeeded { location }),
                _ => Err(ProviderError::invalid_response(
                    "task succeeded without a video_url",
                )),
            },
            "failed" | "error" => Ok(TaskStatus::Failed {
                reason: task
                    .error
                    .or(task.message)
                    .unwrap_or_else(|| "unknown provider error".to_string()),
            }),
            other => {
                warn!(provider = %self.config.name, status = other, "Unknown task status");
                Err(ProviderError::invalid_response(format!(
                    "unknown task status '{}'",
                    other
                )))
            }
        }
    }

    async fn download(&self, location: &str) -> ProviderResult<Vec<u8>> {
        debug!(provider = %self.config.name, location = %location, "Downloading generated asset");
        let request = self.http.get(location);
        let response = if self.is_provider_origin(location) {
            self.send(request).await?
        } else {
            self.dispatch(request).await?
        };
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(bytes.to_vec())
    }
}
