//! Plan and apply reads: the status and log location the log reader needs.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{Client, valid_string_id};
use crate::errors::ClientError;
use crate::logs::{CompletionProbe, HttpLogSource, LogReader};

/// Kind of background job that produces a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Plan,
    Apply,
}

impl JobKind {
    /// Lowercase name used in messages and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
        }
    }

    fn collection(&self) -> &'static str {
        match self {
            Self::Plan => "plans",
            Self::Apply => "applies",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status shared by plans and applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Canceled,
    Created,
    Errored,
    Finished,
    MfaWaiting,
    Pending,
    Queued,
    Running,
    Unreachable,
    /// Status added server-side after this client was built.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// No further processing or log output happens after a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Errored | Self::Finished | Self::Unreachable
        )
    }
}

/// The parts of a plan or apply resource this crate reads.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Location of the streaming log; absent until the job has one.
    pub log_read_url: Option<String>,
}

#[derive(Deserialize)]
struct JobDocument {
    data: JobData,
}

#[derive(Deserialize)]
struct JobData {
    id: String,
    attributes: JobAttributes,
}

#[derive(Deserialize)]
struct JobAttributes {
    status: JobStatus,
    #[serde(rename = "log-read-url", default)]
    log_read_url: Option<String>,
}

/// Accessor for one job collection (`plans` or `applies`).
#[derive(Clone)]
pub struct Jobs {
    client: Client,
    kind: JobKind,
}

impl Jobs {
    pub(crate) fn new(client: Client, kind: JobKind) -> Self {
        Self { client, kind }
    }

    /// Collection this handle reads from.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Reads a job by id.
    pub async fn read(&self, id: &str) -> Result<Job, ClientError> {
        if !valid_string_id(id) {
            return Err(ClientError::Validation(format!(
                "invalid value for {} ID: {id:?}",
                self.kind
            )));
        }
        let document: JobDocument = self
            .client
            .get_json(&format!("{}/{id}", self.kind.collection()))
            .await?;
        debug!(
            event = "jobs.read",
            domain = "jobs",
            kind = self.kind.as_str(),
            job_id = %document.data.id,
            status = ?document.data.attributes.status
        );
        Ok(Job {
            id: document.data.id,
            kind: self.kind,
            status: document.data.attributes.status,
            log_read_url: document
                .data
                .attributes
                .log_read_url
                .filter(|url| !url.trim().is_empty()),
        })
    }

    /// Opens a reader over the job's log.
    ///
    /// The job is read once to make sure it exists and to obtain its log
    /// location; the returned reader re-reads it to learn when the log is
    /// complete. Reader settings come from the client's `log_poll` policy.
    /// Cancelling `cancel` while the job is being read fails with
    /// [`ClientError::Cancelled`].
    pub async fn logs(&self, id: &str, cancel: CancellationToken) -> Result<LogReader, ClientError> {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            job = self.read(id) => job?,
        };
        let Some(raw_url) = job.log_read_url else {
            return Err(ClientError::Validation(format!(
                "{} {} does not have a log URL",
                self.kind, job.id
            )));
        };
        let url = reqwest::Url::parse(&raw_url)
            .map_err(|e| ClientError::Decode(format!("invalid log URL: {e}")))?;
        let source = HttpLogSource::new(self.client.clone(), url);
        let probe = JobProbe {
            jobs: self.clone(),
            id: job.id,
        };
        Ok(LogReader::new(source, probe, cancel)
            .with_policy(self.client.inner.config.log_poll.clone()))
    }

    /// Completion predicate for one job of this collection.
    pub fn probe(&self, id: impl Into<String>) -> JobProbe {
        JobProbe {
            jobs: self.clone(),
            id: id.into(),
        }
    }
}

/// [`CompletionProbe`] that re-reads a job and checks for a terminal status.
#[derive(Clone)]
pub struct JobProbe {
    jobs: Jobs,
    id: String,
}

#[async_trait::async_trait]
impl CompletionProbe for JobProbe {
    async fn is_done(&self) -> Result<bool, ClientError> {
        Ok(self.jobs.read(&self.id).await?.status.is_terminal())
    }
}
