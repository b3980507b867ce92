use std::future::Future;
use std::time::Duration;

use bytes::{BufMut as _, Bytes, BytesMut};
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::LogReadError;
use crate::logs::source::{CompletionProbe, LogSource};
use crate::policy::LogPollPolicy;

/// Start-of-text marker written at the head of remote logs.
const STX: u8 = 0x02;
/// End-of-text marker written once the producer is done.
const ETX: u8 = 0x03;

enum ReaderState {
    Reading,
    Finished,
    Failed(LogReadError),
}

/// Pull-based reader over a remote log that is still being written.
///
/// `read_chunk` keeps fetching past the current offset. While nothing new is
/// available it asks the [`CompletionProbe`] whether the job is done and backs
/// off between polls; end of stream is only reported once the job is terminal
/// and a fetch made after that observation came back empty.
///
/// All work happens inside the caller's `read_chunk().await`; the reader spawns
/// nothing.
pub struct LogReader {
    source: Box<dyn LogSource>,
    probe: Box<dyn CompletionProbe>,
    policy: LogPollPolicy,
    cancel: CancellationToken,
    offset: u64,
    terminal_seen: bool,
    /// A trailing ETX withheld until the next bytes show whether it was content.
    held_etx: bool,
    state: ReaderState,
}

impl LogReader {
    /// Creates a reader at offset 0 with the default [`LogPollPolicy`].
    pub fn new(
        source: impl LogSource + 'static,
        probe: impl CompletionProbe + 'static,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: Box::new(source),
            probe: Box::new(probe),
            policy: LogPollPolicy::default(),
            cancel,
            offset: 0,
            terminal_seen: false,
            held_etx: false,
            state: ReaderState::Reading,
        }
    }

    /// Replaces the polling and retry policy.
    pub fn with_policy(mut self, policy: LogPollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Starts reading at `offset` instead of the beginning, e.g. to resume a
    /// previous reader whose offset the caller persisted.
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Remote bytes consumed so far, framing markers included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Policy this reader polls and retries with.
    pub fn policy(&self) -> &LogPollPolicy {
        &self.policy
    }

    /// Returns the next chunk, `Ok(None)` at end of stream, or a terminal error.
    ///
    /// After end of stream every call returns `Ok(None)`; after an error every
    /// call returns that error again.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, LogReadError> {
        match &self.state {
            ReaderState::Reading => {}
            ReaderState::Finished => return Ok(None),
            ReaderState::Failed(err) => return Err(err.clone()),
        }
        let result = self.next_chunk().await;
        match &result {
            Ok(Some(_)) => {}
            Ok(None) => self.state = ReaderState::Finished,
            Err(err) => self.state = ReaderState::Failed(err.clone()),
        }
        result
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, LogReadError> {
        let limit = self.policy.chunk_size.max(1);
        let mut empty_polls = 0_u32;
        let mut retries = 0_u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LogReadError::Cancelled);
            }
            let fetched = cancellable(&self.cancel, self.source.fetch(self.offset, limit)).await?;
            match fetched {
                Ok(raw) if !raw.is_empty() => {
                    let at = self.offset;
                    self.offset += raw.len() as u64;
                    retries = 0;
                    let chunk = self.unframe(raw, at);
                    debug!(
                        event = "logs.chunk_read",
                        domain = "logs",
                        offset = at,
                        raw_bytes = self.offset - at,
                        bytes = chunk.len() as u64
                    );
                    if chunk.is_empty() {
                        // Only framing bytes: progress was made, fetch again right away.
                        empty_polls = 0;
                        continue;
                    }
                    return Ok(Some(chunk));
                }
                Ok(_) => {
                    retries = 0;
                    if self.terminal_seen {
                        debug!(
                            event = "logs.end_of_stream",
                            domain = "logs",
                            offset = self.offset
                        );
                        return Ok(None);
                    }
                    let done = cancellable(&self.cancel, self.probe.is_done())
                        .await?
                        .map_err(LogReadError::Status)?;
                    if done {
                        // One more fetch covers bytes written between the
                        // empty fetch and the status check.
                        self.terminal_seen = true;
                        continue;
                    }
                    let delay = self.policy.poll_delay(empty_polls);
                    empty_polls = empty_polls.saturating_add(1);
                    debug!(
                        event = "logs.poll_wait",
                        domain = "logs",
                        offset = self.offset,
                        empty_polls,
                        delay_ms = delay.as_millis() as u64
                    );
                    self.sleep(delay).await?;
                }
                Err(err) if err.is_transient() => {
                    if !self.policy.can_retry(retries) {
                        warn!(
                            event = "logs.retries_exhausted",
                            domain = "logs",
                            code = err.as_label(),
                            attempts = retries + 1,
                            offset = self.offset
                        );
                        return Err(LogReadError::RetriesExhausted {
                            attempts: retries + 1,
                            last: err,
                        });
                    }
                    let delay = self.policy.retry_delay(retries);
                    retries += 1;
                    warn!(
                        event = "logs.fetch_retry",
                        domain = "logs",
                        code = err.as_label(),
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        message = %err
                    );
                    self.sleep(delay).await?;
                }
                Err(err) => {
                    warn!(
                        event = "logs.fetch_failed",
                        domain = "logs",
                        code = err.as_label(),
                        offset = self.offset,
                        message = %err
                    );
                    return Err(LogReadError::Fetch(err));
                }
            }
        }
    }

    /// Drops the STX that opens the log and the ETX that closes it.
    ///
    /// Only the very last byte of the log is the end marker, so a trailing ETX
    /// is held back and emitted in front of the next bytes if more arrive.
    fn unframe(&mut self, raw: Bytes, at: u64) -> Bytes {
        if !self.policy.strip_framing {
            return raw;
        }
        let mut chunk = raw;
        if at == 0 && chunk.first() == Some(&STX) {
            chunk = chunk.slice(1..);
        }
        if self.held_etx && !chunk.is_empty() {
            let mut joined = BytesMut::with_capacity(chunk.len() + 1);
            joined.put_u8(ETX);
            joined.extend_from_slice(&chunk);
            chunk = joined.freeze();
            self.held_etx = false;
        }
        if chunk.last() == Some(&ETX) {
            chunk = chunk.slice(..chunk.len() - 1);
            self.held_etx = true;
        }
        chunk
    }

    async fn sleep(&self, delay: Duration) -> Result<(), LogReadError> {
        if self.cancel.is_cancelled() {
            return Err(LogReadError::Cancelled);
        }
        cancellable(&self.cancel, tokio::time::sleep(delay)).await
    }

    /// Adapts the reader into a stream of chunks that ends at end of stream or
    /// after the first error.
    pub fn into_stream(self) -> impl futures::Stream<Item = Result<Bytes, LogReadError>> + Send {
        stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.read_chunk().await?;
            Ok::<_, LogReadError>(chunk.map(|chunk| (chunk, reader)))
        })
    }

    /// Adapts the reader into an [`AsyncRead`](tokio::io::AsyncRead).
    ///
    /// Errors are converted with `From<LogReadError> for io::Error` and repeat
    /// on every later read; cancellation is [`std::io::ErrorKind::Other`], not a
    /// retryable kind.
    pub fn into_async_read(self) -> impl tokio::io::AsyncRead + Send + Unpin {
        let chunks = stream::unfold(self, |mut reader| async move {
            match reader.read_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                // The reader keeps returning its stored error.
                Err(err) => Some((Err(err), reader)),
            }
        });
        tokio_util::io::StreamReader::new(Box::pin(chunks))
    }

    /// Reads until end of stream and returns everything.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, LogReadError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, LogReadError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LogReadError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::policy::Backoff;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Remote log whose content and failures are scripted by the test.
    #[derive(Clone, Default)]
    struct FakeLog {
        content: Arc<Mutex<Vec<u8>>>,
        failures: Arc<Mutex<VecDeque<ClientError>>>,
        fetches: Arc<AtomicUsize>,
        /// Bytes appended right after the Nth fetch (0-based) returns.
        appends: Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
    }

    impl FakeLog {
        fn with_content(bytes: &[u8]) -> Self {
            let log = Self::default();
            log.content.lock().expect("lock").extend_from_slice(bytes);
            log
        }

        fn fail_next(&self, err: ClientError) {
            self.failures.lock().expect("lock").push_back(err);
        }

        fn append_after_fetch(&self, fetch: usize, bytes: &[u8]) {
            self.appends
                .lock()
                .expect("lock")
                .push((fetch, bytes.to_vec()));
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl LogSource for FakeLog {
        async fn fetch(&self, offset: u64, limit: usize) -> Result<Bytes, ClientError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failures.lock().expect("lock").pop_front() {
                return Err(err);
            }
            let out = {
                let content = self.content.lock().expect("lock");
                let start = (offset as usize).min(content.len());
                let end = (start + limit).min(content.len());
                Bytes::copy_from_slice(&content[start..end])
            };
            let mut appends = self.appends.lock().expect("lock");
            if let Some(pos) = appends.iter().position(|(at, _)| *at == n) {
                let (_, bytes) = appends.remove(pos);
                self.content.lock().expect("lock").extend_from_slice(&bytes);
            }
            Ok(out)
        }
    }

    /// Completion predicate answering from a script, then repeating the last answer.
    #[derive(Clone)]
    struct ScriptedProbe {
        answers: Arc<Mutex<VecDeque<Result<bool, ClientError>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new(answers: Vec<Result<bool, ClientError>>) -> Self {
            Self {
                answers: Arc::new(Mutex::new(answers.into())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl CompletionProbe for ScriptedProbe {
        async fn is_done(&self) -> Result<bool, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().expect("lock");
            if answers.len() > 1 {
                answers.pop_front().expect("non-empty")
            } else {
                answers.front().cloned().unwrap_or(Ok(true))
            }
        }
    }

    fn fast_policy() -> LogPollPolicy {
        LogPollPolicy::default()
            .poll(Backoff::constant(10))
            .retry(Backoff::constant(10))
            .strip_framing(false)
    }

    fn unavailable() -> ClientError {
        ClientError::Api {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_until_terminal_then_ends() {
        let log = FakeLog::default();
        let probe = ScriptedProbe::new(vec![Ok(false), Ok(false), Ok(false), Ok(true)]);
        let mut reader = LogReader::new(log.clone(), probe.clone(), CancellationToken::new())
            .with_policy(fast_policy());

        assert_eq!(reader.read_chunk().await, Ok(None));
        assert_eq!(probe.calls(), 4);
        // Four polled fetches plus the confirming fetch after the terminal answer.
        assert_eq!(log.fetches(), 5);
        assert_eq!(reader.read_chunk().await, Ok(None));
        assert_eq!(log.fetches(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn bytes_written_during_status_check_are_not_lost() {
        let log = FakeLog::with_content(b"first ");
        // Fetch #1 (0-based) is the empty one before the status check.
        log.append_after_fetch(1, b"last");
        let probe = ScriptedProbe::new(vec![Ok(true)]);
        let mut reader =
            LogReader::new(log.clone(), probe, CancellationToken::new()).with_policy(fast_policy());

        assert_eq!(
            reader.read_chunk().await,
            Ok(Some(Bytes::from_static(b"first ")))
        );
        assert_eq!(
            reader.read_chunk().await,
            Ok(Some(Bytes::from_static(b"last")))
        );
        assert_eq!(reader.read_chunk().await, Ok(None));
        assert_eq!(reader.offset(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_concatenate_to_full_content_across_growth() {
        let log = FakeLog::with_content(b"0123");
        log.append_after_fetch(2, b"4567");
        log.append_after_fetch(5, b"89");
        let probe = ScriptedProbe::new(vec![Ok(false), Ok(false), Ok(false), Ok(true)]);
        let reader = LogReader::new(log, probe, CancellationToken::new())
            .with_policy(fast_policy().chunk_size(3));

        assert_eq!(reader.read_to_end().await.expect("read"), b"0123456789");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_within_budget() {
        let log = FakeLog::with_content(b"hello");
        log.fail_next(unavailable());
        log.fail_next(unavailable());
        let mut reader = LogReader::new(
            log.clone(),
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy().max_retries(3));

        assert_eq!(
            reader.read_chunk().await,
            Ok(Some(Bytes::from_static(b"hello")))
        );
        assert_eq!(log.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_budget_is_terminal() {
        let log = FakeLog::with_content(b"hello");
        for _ in 0..3 {
            log.fail_next(unavailable());
        }
        let mut reader = LogReader::new(
            log.clone(),
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy().max_retries(2));

        let err = reader.read_chunk().await.expect_err("budget exceeded");
        assert!(matches!(
            err,
            LogReadError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(log.fetches(), 3);
        assert_eq!(reader.read_chunk().await, Err(err));
        assert_eq!(log.fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failure_is_not_retried() {
        let log = FakeLog::default();
        log.fail_next(ClientError::Api {
            status: 404,
            message: "not found".into(),
        });
        let mut reader = LogReader::new(
            log.clone(),
            ScriptedProbe::new(vec![Ok(false)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy());

        assert!(matches!(
            reader.read_chunk().await,
            Err(LogReadError::Fetch(ClientError::Api { status: 404, .. }))
        ));
        assert_eq!(log.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_surfaces_as_status_error() {
        let mut reader = LogReader::new(
            FakeLog::default(),
            ScriptedProbe::new(vec![Err(ClientError::Decode("bad doc".into()))]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy());

        assert!(matches!(
            reader.read_chunk().await,
            Err(LogReadError::Status(ClientError::Decode(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let cancel = CancellationToken::new();
        let mut reader = LogReader::new(
            FakeLog::default(),
            ScriptedProbe::new(vec![Ok(false)]),
            cancel.clone(),
        )
        .with_policy(fast_policy().poll(Backoff::constant(60_000)));

        let started = tokio::time::Instant::now();
        let pending = tokio::spawn(async move { reader.read_chunk().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        assert_eq!(pending.await.expect("join"), Err(LogReadError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancelled_token_fails_before_fetching() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let log = FakeLog::with_content(b"data");
        let mut reader = LogReader::new(log.clone(), ScriptedProbe::new(vec![Ok(true)]), cancel);

        assert_eq!(reader.read_chunk().await, Err(LogReadError::Cancelled));
        assert_eq!(log.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn framing_markers_are_stripped_but_counted() {
        let log = FakeLog::with_content(b"\x02plan output\x03");
        let mut reader = LogReader::new(
            log,
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy().strip_framing(true));

        assert_eq!(
            reader.read_chunk().await,
            Ok(Some(Bytes::from_static(b"plan output")))
        );
        assert_eq!(reader.offset(), 13);
        assert_eq!(reader.read_chunk().await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_reader_starts_at_given_offset() {
        let log = FakeLog::with_content(b"abcdef");
        let reader = LogReader::new(
            log,
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy())
        .starting_at(4);

        assert_eq!(reader.read_to_end().await.expect("read"), b"ef");
    }

    #[tokio::test(start_paused = true)]
    async fn async_read_adapter_reads_whole_log() {
        use tokio::io::AsyncReadExt as _;

        let log = FakeLog::with_content(b"line one\nline two\n");
        let mut read = LogReader::new(
            log,
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy().chunk_size(4))
        .into_async_read();

        let mut out = String::new();
        read.read_to_string(&mut out).await.expect("read");
        assert_eq!(out, "line one\nline two\n");
    }

    #[tokio::test(start_paused = true)]
    async fn end_marker_byte_inside_content_is_kept() {
        // The 0x03 after "ab" lands on a chunk boundary but is content.
        let log = FakeLog::with_content(b"\x02ab\x03cd\x03");
        let reader = LogReader::new(
            log,
            ScriptedProbe::new(vec![Ok(true)]),
            CancellationToken::new(),
        )
        .with_policy(fast_policy().strip_framing(true).chunk_size(4));

        assert_eq!(reader.read_to_end().await.expect("read"), b"ab\x03cd");
    }

    #[tokio::test]
    async fn async_read_adapter_keeps_failing_after_cancellation() {
        use tokio::io::AsyncReadExt as _;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut read = LogReader::new(
            FakeLog::with_content(b"data"),
            ScriptedProbe::new(vec![Ok(true)]),
            cancel,
        )
        .into_async_read();

        let mut buf = [0_u8; 8];
        let first = read.read(&mut buf).await.expect_err("cancelled");
        assert_eq!(first.kind(), std::io::ErrorKind::Other);
        let second = read.read(&mut buf).await.expect_err("still cancelled");
        assert_eq!(second.kind(), std::io::ErrorKind::Other);
        let mut rest = Vec::new();
        assert!(read.read_to_end(&mut rest).await.is_err());
        assert!(rest.is_empty());
    }
}
