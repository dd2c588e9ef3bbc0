//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ot_cosim_rt::{ShutdownRx, TaskHandle};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, trace, warn};

use crate::envelope::{decode, Envelope, EnvelopeKind};
use crate::frame::{read_frame, write_frame, Frame};
use crate::logging::{log_envelope, MessageDirection};
use crate::memory::InMemoryBus;
use crate::{MessagingError, Result, TOPIC_LOG};

const PUSH_QUEUE_DEPTH: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Destination for pushed frames.
pub trait FrameSink: Send + Sync {
    /// Hand a frame to the sink without blocking.
    fn send_frame(&self, frame: Frame) -> Result<()>;
    /// Human-readable sink name for logging.
    fn name(&self) -> &'static str;
}

/// Callback invoked for every dispatched envelope of the registered kind.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Normalise a `tcp://host:port` (or bare `host:port`) endpoint into a
/// connectable address. A `*` host means every interface.
pub fn parse_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    let address = trimmed.strip_prefix("tcp://").unwrap_or(trimmed);
    if address.contains("://") {
        return Err(MessagingError::InvalidEndpoint(endpoint.to_owned()));
    }
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| MessagingError::InvalidEndpoint(endpoint.to_owned()))?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(MessagingError::InvalidEndpoint(endpoint.to_owned()));
    }
    let host = if host == "*" { "0.0.0.0" } else { host };
    Ok(format!("{host}:{port}"))
}

struct TcpPushSink {
    address: String,
    queue: mpsc::Sender<Frame>,
}

impl FrameSink for TcpPushSink {
    fn send_frame(&self, frame: Frame) -> Result<()> {
        self.queue.try_send(frame).map_err(|err| {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "push queue full",
                mpsc::error::TrySendError::Closed(_) => "pusher stopped",
            };
            MessagingError::TransportUnavailable(format!("{}: {reason}", self.address))
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

async fn run_writer(address: String, mut queue: mpsc::Receiver<Frame>, mut shutdown: ShutdownRx) {
    let mut stream: Option<TcpStream> = None;
    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = queue.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
        };

        if stream.is_none() {
            match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
                Ok(Ok(connected)) => {
                    let _ = connected.set_nodelay(true);
                    debug!(%address, "pusher connected");
                    stream = Some(connected);
                }
                Ok(Err(err)) => {
                    warn!(%address, topic = %frame.topic, error = %err, "collector unavailable; frame dropped");
                    continue;
                }
                Err(_) => {
                    warn!(%address, topic = %frame.topic, "collector connect timed out; frame dropped");
                    continue;
                }
            }
        }

        if let Some(connected) = stream.as_mut() {
            if let Err(err) = write_frame(connected, &frame).await {
                warn!(%address, topic = %frame.topic, error = %err, "push failed; frame dropped");
                stream = None;
            }
        }
    }
    debug!(%address, "pusher stopped; pending frames dropped");
}

/// Fire-and-forget sender towards the bus collector.
///
/// Pushing never blocks: when the collector is unreachable or the local queue
/// is full the frame is dropped. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Pusher {
    sink: Arc<dyn FrameSink>,
    writer: Arc<Mutex<Option<TaskHandle<()>>>>,
}

impl std::fmt::Debug for Pusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pusher")
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl Pusher {
    /// Push to the collector listening on `endpoint`. The connection is made
    /// lazily by a background writer, so this must run inside a tokio runtime.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let address = parse_endpoint(endpoint)?;
        let (queue, pending) = mpsc::channel(PUSH_QUEUE_DEPTH);
        let writer_address = address.clone();
        let writer = TaskHandle::spawn(format!("pusher:{address}"), move |shutdown| {
            run_writer(writer_address, pending, shutdown)
        });
        Ok(Self {
            sink: Arc::new(TcpPushSink { address, queue }),
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    /// Push into an arbitrary sink.
    pub fn from_sink(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Push into an in-process bus.
    pub fn in_memory(bus: &InMemoryBus) -> Self {
        Self::from_sink(Arc::new(bus.clone()))
    }

    /// Encode `envelope` and push it on `topic`.
    pub fn push(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let payload = envelope.encode()?;
        log_envelope(MessageDirection::Outbound, topic, envelope);
        self.push_raw(topic, payload)
    }

    /// Push an arbitrary payload on `topic`.
    pub fn push_raw(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.sink.send_frame(Frame::new(topic, payload))
    }

    /// Push a plain-text log line on the `LOG` topic.
    pub fn push_log(&self, module: &str, level: &str, message: impl std::fmt::Display) -> Result<()> {
        self.push_raw(TOPIC_LOG, format!("[{module}] [{level}] {message}"))
    }

    /// Stop the background writer. Frames still queued are dropped.
    pub async fn shutdown(&self) {
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(err) = writer.stop().await {
                warn!(error = %err, "pusher writer task failed");
            }
        }
    }
}

/// What happened to a frame handed to [`Subscriber::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Frame topic differs from the subscribed topic; dropped silently.
    TopicMismatch,
    /// Payload did not decode; dropped.
    Malformed,
    /// Envelope kind has no handlers on this subscription.
    Ignored(EnvelopeKind),
    /// Handlers registered for `kind` were invoked.
    Delivered {
        /// Dispatched kind.
        kind: EnvelopeKind,
        /// Number of handlers called.
        handlers: usize,
    },
}

#[derive(Clone)]
enum Source {
    Tcp(String),
    Memory(InMemoryBus),
}

/// Topic subscription dispatching decoded envelopes to registered handlers.
#[derive(Clone)]
pub struct Subscriber {
    source: Source,
    status_handlers: Vec<Handler>,
    update_handlers: Vec<Handler>,
}

impl Subscriber {
    /// Subscribe through the broker's fan-out endpoint. The connection is
    /// established (and re-established) once the subscriber is started.
    pub fn connect(endpoint: &str) -> Result<Self> {
        Ok(Self::with_source(Source::Tcp(parse_endpoint(endpoint)?)))
    }

    /// Subscribe to an in-process bus.
    pub fn in_memory(bus: &InMemoryBus) -> Self {
        Self::with_source(Source::Memory(bus.clone()))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            status_handlers: Vec::new(),
            update_handlers: Vec::new(),
        }
    }

    /// Register a handler for `Status` envelopes.
    pub fn add_status_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.status_handlers.push(Arc::new(handler));
    }

    /// Register a handler for `Update` envelopes.
    pub fn add_update_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.update_handlers.push(Arc::new(handler));
    }

    /// Decode `frame` and invoke the handlers registered for its kind, in
    /// registration order. A panicking handler is reported and skipped.
    pub fn dispatch(&self, subscribed: &str, frame: &Frame) -> DispatchOutcome {
        if frame.topic != subscribed {
            trace!(expected = %subscribed, topic = %frame.topic, "dropping frame for foreign topic");
            return DispatchOutcome::TopicMismatch;
        }
        let envelope = match decode(&frame.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(topic = %frame.topic, error = %err, "dropping undecodable frame");
                return DispatchOutcome::Malformed;
            }
        };
        log_envelope(MessageDirection::Inbound, &frame.topic, &envelope);

        let kind = envelope.kind();
        let handlers = match kind {
            EnvelopeKind::Status => &self.status_handlers,
            EnvelopeKind::Update => &self.update_handlers,
            other => return DispatchOutcome::Ignored(other),
        };
        for (index, handler) in handlers.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                error!(
                    topic = %frame.topic,
                    kind = %kind,
                    sender = %envelope.sender(),
                    handler = index,
                    reason = %panic_reason(panic.as_ref()),
                    "envelope handler panicked"
                );
            }
        }
        DispatchOutcome::Delivered {
            kind,
            handlers: handlers.len(),
        }
    }

    /// Start the receive loop for `topic`. Stopping the returned handle ends
    /// the loop promptly, even while it waits for the next frame.
    pub fn start(self, topic: impl Into<String>) -> TaskHandle<()> {
        let topic = topic.into();
        match self.source.clone() {
            Source::Memory(bus) => {
                let frames = bus.subscribe();
                TaskHandle::spawn(format!("subscriber:{topic}"), move |shutdown| {
                    self.run_memory(topic, frames, shutdown)
                })
            }
            Source::Tcp(address) => {
                TaskHandle::spawn(format!("subscriber:{topic}"), move |shutdown| {
                    self.run_tcp(address, topic, shutdown)
                })
            }
        }
    }

    async fn run_memory(
        self,
        topic: String,
        mut frames: broadcast::Receiver<Frame>,
        mut shutdown: ShutdownRx,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = frames.recv() => next,
            };
            match next {
                Ok(frame) => {
                    self.dispatch(&topic, &frame);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%topic, missed, "subscriber lagged; frames lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!(%topic, "subscriber stopped");
    }

    async fn run_tcp(self, address: String, topic: String, mut shutdown: ShutdownRx) {
        'session: loop {
            let stream = tokio::select! {
                biased;
                _ = &mut shutdown => break 'session,
                stream = connect_with_retry(&address) => stream,
            };
            let (mut reader, mut writer) = stream.into_split();
            match write_frame(&mut writer, &Frame::new(topic.clone(), Bytes::new())).await {
                Ok(()) => {
                    debug!(%address, %topic, "subscribed");
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = &mut shutdown => break 'session,
                            next = read_frame(&mut reader) => next,
                        };
                        match next {
                            Ok(Some(frame)) => {
                                self.dispatch(&topic, &frame);
                            }
                            Ok(None) => {
                                warn!(%address, %topic, "broker closed subscription; reconnecting");
                                break;
                            }
                            Err(err) => {
                                warn!(%address, %topic, error = %err, "subscription read failed; reconnecting");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%address, %topic, error = %err, "failed to register topic filter");
                }
            }

            // one reconnect delay between sessions
            tokio::select! {
                biased;
                _ = &mut shutdown => break 'session,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        debug!(%topic, "subscriber stopped");
    }
}

async fn connect_with_retry(address: &str) -> TcpStream {
    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return stream;
            }
            Err(err) => {
                trace!(%address, error = %err, "broker not reachable yet");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
