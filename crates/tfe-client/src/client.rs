//! Base request/response machinery shared by the event and log components.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::events::Events;
use crate::jobs::{JobKind, Jobs};

pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ClientConfig,
}

/// Entry point for subscribing to events and reading job logs.
///
/// Cheap to clone; clones share one HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            inner: Arc::new(ClientInner { http, config }),
        })
    }

    /// Creates a client using `TFE_TOKEN` and `TFE_ADDRESS`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Real-time event subscriptions.
    pub fn events(&self) -> Events {
        Events::new(self.clone())
    }

    /// Plan jobs: status reads and log tailing.
    pub fn plans(&self) -> Jobs {
        Jobs::new(self.clone(), JobKind::Plan)
    }

    /// Apply jobs: status reads and log tailing.
    pub fn applies(&self) -> Jobs {
        Jobs::new(self.clone(), JobKind::Apply)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self.inner.config.token.trim();
        if token.is_empty() {
            builder
        } else {
            builder.bearer_auth(token)
        }
    }

    /// GETs an API path and decodes the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.inner.config.api_url(path);
        let request = self
            .with_auth(self.inner.http.get(&url))
            .header(reqwest::header::ACCEPT, "application/vnd.api+json");
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        let response = check_status(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// GETs an absolute URL with query parameters and returns the raw body.
    pub(crate) async fn get_bytes(
        &self,
        url: &reqwest::Url,
        query: &[(&str, String)],
    ) -> Result<Bytes, ClientError> {
        let request = self.with_auth(self.inner.http.get(url.clone())).query(query);
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;
        let response = check_status(response).await?;
        response
            .bytes()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    debug!(
        event = "http.response_failed",
        domain = "http",
        status = status.as_u16(),
        body_bytes = body.len() as u64
    );
    Err(ClientError::Api {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or(body),
    })
}

/// Checks an identifier against the usual `[A-Za-z0-9._-]+` id shape.
pub(crate) fn valid_string_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}

/// Pulls a readable message out of a JSON:API error document.
fn error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let messages: Vec<String> = json
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|err| match err {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other
                .get("detail")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .or_else(|| other.get("title").and_then(|v| v.as_str()))
                .map(ToOwned::to_owned),
        })
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}
