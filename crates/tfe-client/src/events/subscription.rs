use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use crate::errors::{EventStreamError, StreamFailure, StreamFailureKind};
use crate::events::event::Event;

/// How long `close()` waits for the server to acknowledge the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Observable lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Handshake succeeded; frames are being forwarded.
    Open,
    /// A read or decode failure ended delivery. Terminal.
    Errored,
    /// The caller closed the subscription. Terminal.
    Closed,
}

/// Handle for one open event stream.
///
/// Events arrive in exactly the order the server sent them. The queue holds at
/// most `event_buffer_capacity` events; while it is full the delivery task stops
/// reading from the socket. After a stream failure the queue yields one `error`
/// event and then `None`.
pub struct Subscription {
    id: String,
    connection_id: uuid::Uuid,
    rx: mpsc::Receiver<Event>,
    state: watch::Receiver<SubscriptionState>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), EventStreamError>>>,
}

impl Subscription {
    /// Hands `socket` to a new delivery task and returns the consumer side.
    pub(crate) fn spawn<S>(id: String, socket: S, capacity: usize) -> Self
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let connection_id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Open);
        let task = tokio::spawn(deliver(DeliveryTask {
            subscription_id: id.clone(),
            connection_id,
            socket,
            tx,
            close_rx,
            state_tx,
        }));
        Self {
            id,
            connection_id,
            rx,
            state: state_rx,
            close_tx: Some(close_tx),
            task: Some(task),
        }
    }

    /// Identifier this subscription was opened with.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unique id of the underlying connection, used in log fields.
    pub fn connection_id(&self) -> uuid::Uuid {
        self.connection_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the stream has ended (after the `error` event, or
    /// after `close()`).
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Direct access to the event queue, for `try_recv` and friends.
    pub fn receiver(&mut self) -> &mut mpsc::Receiver<Event> {
        &mut self.rx
    }

    /// Sends a normal-closure frame and waits for the delivery task to release
    /// the connection.
    ///
    /// No event is delivered after this returns; events still buffered are
    /// discarded. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), EventStreamError> {
        let Some(close_tx) = self.close_tx.take() else {
            return Ok(());
        };
        // The task is already gone if the stream failed earlier.
        let _ = close_tx.send(());
        self.rx.close();

        let result = match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(err) => Err(EventStreamError::Close(format!(
                    "delivery task failed: {err}"
                ))),
            },
            None => Ok(()),
        };
        while self.rx.try_recv().is_ok() {}
        result
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct DeliveryTask<S> {
    subscription_id: String,
    connection_id: uuid::Uuid,
    socket: S,
    tx: mpsc::Sender<Event>,
    close_rx: oneshot::Receiver<()>,
    state_tx: watch::Sender<SubscriptionState>,
}

async fn deliver<S>(mut task: DeliveryTask<S>) -> Result<(), EventStreamError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let mut delivered = 0_u64;
    loop {
        // A dropped `Subscription` resolves `close_rx` with an error; both mean close.
        let frame = tokio::select! {
            biased;
            _ = &mut task.close_rx => return close_connection(task, delivered).await,
            frame = task.socket.next() => frame,
        };

        let decoded = match frame {
            Some(Ok(Message::Text(text))) => decode_frame(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => decode_frame(&data),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => Err(StreamFailure::new(
                StreamFailureKind::ClosedByServer,
                describe_close(frame.as_ref()),
            )),
            Some(Err(err)) => Err(StreamFailure::new(
                StreamFailureKind::Read,
                format!("websocket read error: {err}"),
            )),
            None => Err(StreamFailure::new(
                StreamFailureKind::Read,
                "connection ended without a close frame",
            )),
        };

        match decoded {
            Ok(event) => {
                debug!(
                    event = "events.frame_received",
                    domain = "events",
                    subscription_id = %task.subscription_id,
                    connection_id = %task.connection_id,
                    event_type = %event.kind,
                    seq = delivered
                );
                let sent = tokio::select! {
                    biased;
                    _ = &mut task.close_rx => return close_connection(task, delivered).await,
                    sent = task.tx.send(event) => sent.is_ok(),
                };
                if !sent {
                    // Consumer dropped its receiver: nobody is listening anymore.
                    return close_connection(task, delivered).await;
                }
                delivered = delivered.saturating_add(1);
            }
            Err(failure) => return fail(task, failure, delivered).await,
        }
    }
}

fn decode_frame(bytes: &[u8]) -> Result<Event, StreamFailure> {
    Event::decode(bytes).map_err(|err| {
        StreamFailure::new(
            StreamFailureKind::Decode,
            format!("websocket decode error: {err}"),
        )
    })
}

fn describe_close(frame: Option<&CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => {
            format!("server closed the connection (code {})", u16::from(frame.code))
        }
        Some(frame) => format!(
            "server closed the connection (code {}): {}",
            u16::from(frame.code),
            frame.reason
        ),
        None => "server closed the connection".to_string(),
    }
}

/// Emits the single `error` event and ends delivery.
async fn fail<S>(
    mut task: DeliveryTask<S>,
    failure: StreamFailure,
    delivered: u64,
) -> Result<(), EventStreamError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    warn!(
        event = "events.stream_failed",
        domain = "events",
        subscription_id = %task.subscription_id,
        connection_id = %task.connection_id,
        code = %failure.kind,
        delivered,
        message = %failure.message
    );
    task.state_tx.send_replace(SubscriptionState::Errored);
    if failure.kind == StreamFailureKind::ClosedByServer {
        // Completes the close handshake the server started.
        let _ = tokio::time::timeout(CLOSE_GRACE, task.socket.close()).await;
    }
    tokio::select! {
        biased;
        _ = &mut task.close_rx => {}
        _ = task.tx.send(Event::from_failure(&failure)) => {}
    }
    Ok(())
}

async fn close_connection<S>(
    mut task: DeliveryTask<S>,
    delivered: u64,
) -> Result<(), EventStreamError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    task.state_tx.send_replace(SubscriptionState::Closed);
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    // Send and drain share one grace period.
    let socket = &mut task.socket;
    let handshake = tokio::time::timeout(CLOSE_GRACE, async move {
        socket.send(Message::Close(Some(frame))).await?;
        // Drain until the server echoes the close frame; nothing is forwarded anymore.
        while let Some(Ok(message)) = socket.next().await {
            if message.is_close() {
                break;
            }
        }
        Ok::<_, WsError>(())
    })
    .await;
    let acknowledged = match handshake {
        Ok(Ok(())) => true,
        Ok(Err(err)) => return Err(EventStreamError::Close(err.to_string())),
        Err(_) => false,
    };
    info!(
        event = "events.subscription_closed",
        domain = "events",
        subscription_id = %task.subscription_id,
        connection_id = %task.connection_id,
        delivered,
        acknowledged
    );
    Ok(())
}
