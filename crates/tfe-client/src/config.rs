use std::time::Duration;

use crate::errors::ClientError;
use crate::policy::LogPollPolicy;

pub const DEFAULT_ADDRESS: &str = "https://app.terraform.io";
pub const DEFAULT_BASE_PATH: &str = "/api/v2/";

/// Configuration for [`Client`](crate::Client).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Service address, for example `https://app.terraform.io`.
    pub address: String,
    /// Path prefix of the JSON API.
    pub base_path: String,
    /// API token sent as bearer auth on HTTP requests and the event handshake.
    pub token: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
    /// Upper bound for the event stream handshake.
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Capacity of each subscription's event queue.
    ///
    /// Small on purpose: a slow consumer throttles socket reads instead of
    /// growing an unbounded buffer.
    pub event_buffer_capacity: usize,
    /// Defaults applied to every [`LogReader`](crate::LogReader) created by the client.
    pub log_poll: LogPollPolicy,
}

impl ClientConfig {
    /// Creates a config for the default address with the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("tfe-client/{}", env!("CARGO_PKG_VERSION")),
            event_buffer_capacity: 1,
            log_poll: LogPollPolicy::default(),
        }
    }

    /// Builds a config from `TFE_TOKEN` and optional `TFE_ADDRESS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let token = std::env::var("TFE_TOKEN").unwrap_or_default();
        if token.trim().is_empty() {
            return Err(ClientError::Config("missing TFE_TOKEN".into()));
        }
        let mut config = Self::new(token);
        if let Ok(address) = std::env::var("TFE_ADDRESS")
            && !address.trim().is_empty()
        {
            config.address = address.trim().to_string();
        }
        Ok(config)
    }

    /// Overrides the service address (useful for private installs or test servers).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the JSON API path prefix.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Sets the per-request HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the event stream handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the `User-Agent` sent on every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the per-subscription event queue capacity.
    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    /// Sets the default log reader policy.
    pub fn log_poll(mut self, policy: LogPollPolicy) -> Self {
        self.log_poll = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if !self.address.starts_with("http://") && !self.address.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "address must start with http:// or https://, got: {}",
                self.address
            )));
        }
        if self.event_buffer_capacity == 0 {
            return Err(ClientError::Config(
                "event_buffer_capacity must be greater than 0".into(),
            ));
        }
        self.log_poll.validate()
    }

    /// Absolute URL for an API path such as `plans/plan-123`.
    pub(crate) fn api_url(&self, path: &str) -> String {
        let base_path = self.base_path.trim_matches('/');
        let path = path.trim_start_matches('/');
        if base_path.is_empty() {
            format!("{}/{}", self.address.trim_end_matches('/'), path)
        } else {
            format!(
                "{}/{}/{}",
                self.address.trim_end_matches('/'),
                base_path,
                path
            )
        }
    }

    /// WebSocket endpoint of the event stream on the same host.
    pub(crate) fn events_url(&self) -> Result<String, ClientError> {
        let mut url = reqwest::Url::parse(&self.address)
            .map_err(|e| ClientError::Config(format!("invalid address: {e}")))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ClientError::Config(format!(
                    "unsupported address scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot use {scheme} for address")))?;
        url.set_path("/events");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.to_string())
    }
}
