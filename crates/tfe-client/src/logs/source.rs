use bytes::Bytes;

use crate::client::Client;
use crate::errors::ClientError;

/// Byte-range access to a remote, append-only log.
#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Returns up to `limit` bytes starting at `offset`.
    ///
    /// An empty result means nothing has been written past `offset` yet.
    async fn fetch(&self, offset: u64, limit: usize) -> Result<Bytes, ClientError>;
}

/// Answers whether the job producing a log has reached a terminal state.
#[async_trait::async_trait]
pub trait CompletionProbe: Send + Sync {
    /// `true` once the job is in a terminal status.
    async fn is_done(&self) -> Result<bool, ClientError>;
}

/// [`LogSource`] backed by a job's `log-read-url`.
///
/// Each fetch is a `GET <url>?limit=<n>&offset=<offset>` sent with the
/// client's auth and user agent.
#[derive(Clone)]
pub struct HttpLogSource {
    client: Client,
    url: reqwest::Url,
}

impl HttpLogSource {
    /// Wraps a log URL; any `limit`/`offset` already in its query is dropped.
    pub fn new(client: Client, mut url: reqwest::Url) -> Self {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "limit" && key != "offset")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        Self { client, url }
    }

    /// Log URL without range parameters.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl LogSource for HttpLogSource {
    async fn fetch(&self, offset: u64, limit: usize) -> Result<Bytes, ClientError> {
        self.client
            .get_bytes(
                &self.url,
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await
    }
}
