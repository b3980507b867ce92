//! Real-time event subscriptions over a persistent WebSocket.

mod event;
mod subscription;

pub use event::{Event, EventType};
pub use subscription::{Subscription, SubscriptionState};

use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tracing::{debug, info};

use crate::client::{Client, valid_string_id};
use crate::errors::EventStreamError;

/// Opens event subscriptions against the client's service host.
#[derive(Clone)]
pub struct Events {
    client: Client,
}

impl Events {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects to the event endpoint and starts delivering events.
    ///
    /// Fails without retrying when the handshake cannot be completed; callers
    /// that want to try again must call `subscribe` again.
    pub async fn subscribe(&self, id: &str) -> Result<Subscription, EventStreamError> {
        if !valid_string_id(id) {
            return Err(EventStreamError::Validation(format!(
                "invalid subscription id: {id:?}"
            )));
        }
        let config = &self.client.inner.config;
        let url = config
            .events_url()
            .map_err(|e| EventStreamError::InvalidEndpoint(e.to_string()))?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| EventStreamError::InvalidEndpoint(e.to_string()))?;
        let headers = request.headers_mut();
        let token = config.token.trim();
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| EventStreamError::Validation("token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, value);
        }

        debug!(event = "events.connecting", domain = "events", subscription_id = id, url = %url);
        let connected = tokio::time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await;
        let (socket, response) = match connected {
            Err(_) => return Err(EventStreamError::Timeout(config.connect_timeout)),
            Ok(Err(err)) => return Err(connect_error(err)),
            Ok(Ok(pair)) => pair,
        };
        info!(
            event = "events.subscribed",
            domain = "events",
            subscription_id = id,
            status = response.status().as_u16()
        );
        Ok(Subscription::spawn(
            id.to_string(),
            socket,
            config.event_buffer_capacity,
        ))
    }
}

fn connect_error(err: WsError) -> EventStreamError {
    match err {
        WsError::Url(e) => EventStreamError::InvalidEndpoint(e.to_string()),
        WsError::Http(response) => EventStreamError::Connect(format!(
            "handshake rejected with status {}",
            response.status()
        )),
        other => EventStreamError::Connect(other.to_string()),
    }
}
