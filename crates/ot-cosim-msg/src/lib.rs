//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Publish/subscribe message bus shared by every co-simulation module.
//!
//! Modules exchange [`Envelope`]s framed as `(topic, payload)` pairs. A
//! [`Pusher`] sends frames fire-and-forget to the [`Broker`], which fans them
//! out to every [`Subscriber`] whose topic filter matches. [`InMemoryBus`]
//! offers the same semantics inside a single process.

pub mod broker;
pub mod envelope;
pub mod frame;
pub mod logging;
pub mod memory;
pub mod transport;

/// Topic carrying `Status` and `Update` traffic.
pub const TOPIC_RUNTIME: &str = "RUNTIME";
/// Topic carrying `Metric` traffic.
pub const TOPIC_HEALTH: &str = "HEALTH";
/// Topic carrying plain-text log lines.
pub const TOPIC_LOG: &str = "LOG";

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised by the envelope codec and the bus transports.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Payload could not be decoded into an envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// The push channel could not hand the frame to its collector.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// An endpoint string could not be parsed.
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    /// A frame part exceeded the configured maximum.
    #[error("frame part of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Observed size.
        size: usize,
        /// Allowed maximum.
        limit: usize,
    },
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use broker::{Broker, BrokerMetrics};
pub use envelope::{
    decode, encode, Confirmation, Contents, Envelope, EnvelopeKind, Metric, MetricKind, Metrics,
    Point, Status, Update, ENVELOPE_VERSION,
};
pub use frame::{Frame, MAX_FRAME_LEN};
pub use logging::{log_envelope, MessageDirection};
pub use memory::InMemoryBus;
pub use transport::{parse_endpoint, DispatchOutcome, FrameSink, Handler, Pusher, Subscriber};
