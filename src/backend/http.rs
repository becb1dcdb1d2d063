//! Generic HTTP backend adapter.
//!
//! Speaks the common OpenAI-style chat-completions wire shape, which most
//! hosted and self-hosted providers accept. Provider-specific clients stay
//! outside this crate; this adapter is the thin boundary glue.

use super::{estimate_tokens, BackendAdapter, BackendReply, HealthProbe};
use crate::error::BackendErrorKind;
use crate::types::CompletionRequest;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::env;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct HttpBackend {
    name: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    cost_per_input_token: f64,
    cost_per_output_token: f64,
}

impl HttpBackend {
    /// Create an adapter for an OpenAI-compatible endpoint.
    ///
    /// The API key is read from `{NAME}_API_KEY` (name uppercased, dashes
    /// replaced by underscores); use [`with_api_key`](Self::with_api_key) to
    /// inject one directly. Request timeout honors
    /// `AI_OPT_HTTP_TIMEOUT_SECS` (default 30).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let base_url = base_url.into();
        url::Url::parse(&base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base_url: {}", e),
                ErrorContext::new()
                    .with_field_path("backend.base_url")
                    .with_details(base_url.clone())
                    .with_source("http_backend"),
            )
        })?;

        let timeout_secs = env::var("AI_OPT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    ErrorContext::new().with_source("http_backend"),
                )
            })?;

        let env_var = format!("{}_API_KEY", name.to_uppercase().replace('-', "_"));
        let api_key = env::var(env_var).ok();

        Ok(Self {
            name,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_costs(mut self, input: f64, output: f64) -> Self {
        self.cost_per_input_token = input;
        self.cost_per_output_token = output;
        self
    }

    fn classify_status(status: u16) -> BackendErrorKind {
        match status {
            401 | 403 => BackendErrorKind::Authentication,
            408 => BackendErrorKind::Timeout,
            429 => BackendErrorKind::RateLimited,
            503 => BackendErrorKind::Overloaded,
            s if (500..=599).contains(&s) => BackendErrorKind::ServerError,
            _ => BackendErrorKind::InvalidRequest,
        }
    }

    fn classify_transport(&self, e: &reqwest::Error) -> BackendErrorKind {
        if e.is_timeout() {
            BackendErrorKind::Timeout
        } else {
            BackendErrorKind::Network
        }
    }

    /// Prompt plus attached file contents, in declared order.
    fn compose_input(request: &CompletionRequest) -> String {
        if request.files.is_empty() {
            return request.prompt.clone();
        }
        let mut input = request.prompt.clone();
        for file in &request.files {
            input.push_str("\n\n");
            input.push_str(&file.content);
        }
        input
    }
}

#[async_trait]
impl BackendAdapter for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &CompletionRequest) -> Result<BackendReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": Self::compose_input(request)}],
        });
        if let Some(t) = request.options.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(m) = request.options.max_tokens {
            body["max_tokens"] = serde_json::json!(m);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let mut req = self
            .client
            .post(&url)
            .json(&body)
            .header("x-request-id", &request_id);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::backend(&self.name, self.classify_transport(&e), e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            debug!(
                backend = self.name.as_str(),
                http_status = status,
                request_id = request_id.as_str(),
                "backend request failed"
            );
            return Err(Error::backend(
                &self.name,
                Self::classify_status(status),
                format!("HTTP {}: {}", status, snippet),
            ));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::backend(&self.name, BackendErrorKind::Network, e.to_string()))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::backend(
                    &self.name,
                    BackendErrorKind::InvalidRequest,
                    "response missing choices[0].message.content",
                )
            })?;

        let tokens_input = json["usage"]["prompt_tokens"]
            .as_u64()
            .map(|v| v as u32)
            .unwrap_or_else(|| estimate_tokens(&Self::compose_input(request)));
        let tokens_output = json["usage"]["completion_tokens"]
            .as_u64()
            .map(|v| v as u32)
            .unwrap_or_else(|| estimate_tokens(&content));
        let cost_eur = tokens_input as f64 * self.cost_per_input_token
            + tokens_output as f64 * self.cost_per_output_token;

        Ok(BackendReply {
            content,
            tokens_input,
            tokens_output,
            cost_eur,
            backend_name: self.name.clone(),
        })
    }

    async fn health_check(&self) -> Result<HealthProbe> {
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let started = Instant::now();
        match req.send().await {
            Ok(resp) => Ok(HealthProbe {
                healthy: resp.status().is_success(),
                latency: started.elapsed(),
            }),
            Err(e) => Err(Error::backend(
                &self.name,
                self.classify_transport(&e),
                e.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestOptions;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            files: Vec::new(),
            options: RequestOptions::default(),
        }
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpBackend::new("alpha", "not a url", "m").is_err());
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            HttpBackend::classify_status(429),
            BackendErrorKind::RateLimited
        );
        assert_eq!(
            HttpBackend::classify_status(401),
            BackendErrorKind::Authentication
        );
        assert_eq!(
            HttpBackend::classify_status(503),
            BackendErrorKind::Overloaded
        );
        assert_eq!(
            HttpBackend::classify_status(500),
            BackendErrorKind::ServerError
        );
        assert_eq!(
            HttpBackend::classify_status(400),
            BackendErrorKind::InvalidRequest
        );
    }

    #[tokio::test]
    async fn test_send_parses_openai_shape() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"four"}}],
                    "usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
            )
            .create_async()
            .await;

        let backend = HttpBackend::new("alpha", server.url(), "test-model")
            .unwrap()
            .with_costs(0.00001, 0.00003);
        let reply = backend.send(&request("What is 2+2?")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(reply.content, "four");
        assert_eq!(reply.tokens_input, 12);
        assert_eq!(reply.tokens_output, 3);
        assert!((reply.cost_eur - (12.0 * 0.00001 + 3.0 * 0.00003)).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down"}}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new("alpha", server.url(), "m").unwrap();
        let err = backend.send(&request("p")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new("alpha", server.url(), "m").unwrap();
        let err = backend.send(&request("p")).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_health_check_measures_latency() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new("alpha", server.url(), "m").unwrap();
        let probe = backend.health_check().await.unwrap();
        assert!(probe.healthy);
        assert!(probe.latency > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_health_check_unhealthy_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(500)
            .create_async()
            .await;

        let backend = HttpBackend::new("alpha", server.url(), "m").unwrap();
        let probe = backend.health_check().await.unwrap();
        assert!(!probe.healthy);
    }
}
