//! API channel — forwards to configurable HTTP providers via reqwest.
//!
//! Each provider entry carries its own method, endpoint, headers, payload
//! and timeout. Templates may reference `{sender}`, `{timestamp}` and
//! `{message}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::Forwarder;
use crate::config::ApiProvider;
use crate::error::ForwardError;
use crate::forward::{Channel, WorkItem};
use crate::pipeline::types::LogicalMessage;

/// Supported HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            _ => None,
        }
    }
}

/// A provider request with every template filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub provider: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub timeout: Duration,
}

/// Executes rendered provider requests.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn dispatch(&self, request: &ApiRequest) -> Result<(), ForwardError>;
}

/// Substitute the message placeholders in one template string.
pub fn interpolate(template: &str, message: &LogicalMessage) -> String {
    template
        .replace("{sender}", &message.originator)
        .replace("{timestamp}", &message.formatted_timestamp())
        .replace("{message}", &message.body)
}

/// Render a provider entry for a message.
pub fn render_request(
    provider: &ApiProvider,
    message: &LogicalMessage,
    default_timeout: Duration,
) -> Result<ApiRequest, ForwardError> {
    let method = HttpMethod::parse(&provider.method).ok_or_else(|| {
        ForwardError::UnsupportedMethod {
            provider: provider.name.clone(),
            method: provider.method.clone(),
        }
    })?;

    let headers = provider
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), interpolate(v, message)))
        .collect();

    let payload = provider
        .payload
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => serde_json::Value::String(interpolate(s, message)),
                other => other.clone(),
            };
            (k.clone(), value)
        })
        .collect();

    Ok(ApiRequest {
        provider: provider.name.clone(),
        method,
        url: interpolate(&provider.endpoint, message),
        headers,
        payload,
        timeout: provider
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(default_timeout),
    })
}

/// Providers to target: the named one when a hint is given, otherwise
/// every provider flagged `default`.
pub fn select_providers<'a>(providers: &'a [ApiProvider], hint: Option<&str>) -> Vec<&'a ApiProvider> {
    providers
        .iter()
        .filter(|p| match hint {
            Some(name) => p.name == name,
            None => p.default,
        })
        .collect()
}

// ── reqwest transport ───────────────────────────────────────────────

/// HTTP transport; any non-2xx response counts as a failure.
pub struct HttpApiTransport {
    client: reqwest::Client,
}

impl HttpApiTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpApiTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiTransport for HttpApiTransport {
    async fn dispatch(&self, request: &ApiRequest) -> Result<(), ForwardError> {
        let builder = match request.method {
            HttpMethod::Post => self.client.post(&request.url).json(&request.payload),
            HttpMethod::Put => self.client.put(&request.url).json(&request.payload),
            HttpMethod::Get if request.payload.is_empty() => self.client.get(&request.url),
            HttpMethod::Get => self.client.get(&request.url).query(&query_pairs(&request.payload)),
        };

        let builder = request
            .headers
            .iter()
            .fold(builder, |b, (k, v)| b.header(k.as_str(), v.as_str()));

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|source| ForwardError::Http {
                provider: request.provider.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::HttpStatus {
                provider: request.provider.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Flatten a JSON payload into query parameters.
fn query_pairs(payload: &serde_json::Map<String, serde_json::Value>) -> Vec<(String, String)> {
    payload
        .iter()
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

// ── Forwarder ───────────────────────────────────────────────────────

/// Forwards to the selected API providers.
pub struct ApiForwarder {
    providers: Vec<ApiProvider>,
    default_timeout: Duration,
    transport: Arc<dyn ApiTransport>,
}

impl ApiForwarder {
    pub fn new(
        providers: Vec<ApiProvider>,
        default_timeout: Duration,
        transport: Arc<dyn ApiTransport>,
    ) -> Self {
        Self {
            providers,
            default_timeout,
            transport,
        }
    }
}

#[async_trait]
impl Forwarder for ApiForwarder {
    fn channel(&self) -> Channel {
        Channel::Api
    }

    fn is_configured(&self) -> bool {
        !self.providers.is_empty()
    }

    async fn deliver(&self, item: &WorkItem) -> bool {
        let selected = select_providers(&self.providers, item.provider_hint());
        if selected.is_empty() {
            warn!(hint = ?item.provider_hint(), "No API provider matches, nothing to send");
            return false;
        }

        let attempts = selected.into_iter().map(|provider| async move {
            let request = render_request(provider, &item.message, self.default_timeout)?;
            debug!(
                provider = %request.provider,
                method = ?request.method,
                url = %request.url,
                "Sending to API provider"
            );
            self.transport.dispatch(&request).await?;
            Ok::<_, ForwardError>(request.provider)
        });

        let mut delivered = false;
        for result in futures::future::join_all(attempts).await {
            match result {
                Ok(provider) => {
                    info!(provider = %provider, "Successfully sent to API");
                    delivered = true;
                }
                Err(e) => error!(error = %e, "Failed to send to API provider"),
            }
        }
        delivered
    }
}
