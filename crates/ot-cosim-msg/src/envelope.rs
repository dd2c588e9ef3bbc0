//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ot_cosim_common::stamp_or_now;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{MessagingError, Result};

/// Protocol version stamped on every envelope.
pub const ENVELOPE_VERSION: &str = "v1";

const SENDER_KEY: &str = "sender";

/// Discriminant describing how an envelope's contents are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Snapshot a module reports about itself.
    Status,
    /// Request to change tag values.
    Update,
    /// Acknowledgement of an update carrying a correlation id.
    Confirmation,
    /// Batch of counters and gauges.
    Metric,
}

impl EnvelopeKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Status => "Status",
            EnvelopeKind::Update => "Update",
            EnvelopeKind::Confirmation => "Confirmation",
            EnvelopeKind::Metric => "Metric",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = MessagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Status" => Ok(EnvelopeKind::Status),
            "Update" => Ok(EnvelopeKind::Update),
            "Confirmation" => Ok(EnvelopeKind::Confirmation),
            "Metric" => Ok(EnvelopeKind::Metric),
            other => Err(MessagingError::MalformedEnvelope(format!(
                "unrecognised kind `{other}`"
            ))),
        }
    }
}

/// Canonical unit of measurement/control state exchanged on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Canonical tag name.
    pub tag: String,
    /// Measured or requested value.
    pub value: f64,
    /// Epoch milliseconds; zero means "unset".
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
}

impl Point {
    /// Point with an unset timestamp.
    pub fn new(tag: impl Into<String>, value: f64) -> Self {
        Self {
            tag: tag.into(),
            value,
            timestamp: 0,
        }
    }

    /// Point with an explicit timestamp.
    pub fn at(tag: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            tag: tag.into(),
            value,
            timestamp,
        }
    }

    /// Replace an unset timestamp with the current wall-clock time.
    pub fn stamped(mut self) -> Self {
        self.timestamp = stamp_or_now(self.timestamp);
        self
    }
}

/// Contents of a `Status` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    /// Reported measurements in emission order.
    pub measurements: Vec<Point>,
}

impl Status {
    /// Wrap a list of measurements.
    pub fn new(measurements: Vec<Point>) -> Self {
        Self { measurements }
    }
}

/// Contents of an `Update` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Update {
    /// Requested tag values in emission order.
    pub updates: Vec<Point>,
    /// Module the update is addressed to; empty means everyone.
    #[serde(default)]
    pub recipient: String,
    /// Correlation id for a requested confirmation; empty means none.
    #[serde(default)]
    pub confirm: String,
}

impl Update {
    /// Broadcast update without confirmation.
    pub fn new(updates: Vec<Point>) -> Self {
        Self {
            updates,
            recipient: String::new(),
            confirm: String::new(),
        }
    }

    /// Address the update to a single module.
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    /// Request a confirmation correlated by `confirm`.
    pub fn with_confirm(mut self, confirm: impl Into<String>) -> Self {
        self.confirm = confirm.into();
        self
    }

    /// Whether the update targets `name` (broadcasts target everyone).
    pub fn is_for(&self, name: &str) -> bool {
        self.recipient.is_empty() || self.recipient == name
    }
}

/// Contents of a `Confirmation` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Confirmation {
    /// Correlation id copied from the originating update.
    pub confirm: String,
    /// Per-tag error descriptions; empty when every tag was applied.
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

/// Metric flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonically non-decreasing value.
    Counter,
    /// Directly set value.
    Gauge,
}

/// One named metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Counter or gauge.
    pub kind: MetricKind,
    /// Metric name, usually prefixed with the module name.
    pub name: String,
    /// Human readable description.
    #[serde(rename = "desc", default)]
    pub description: String,
    /// Current value.
    pub value: f64,
}

/// Contents of a `Metric` envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Batched samples.
    pub metrics: Vec<Metric>,
}

/// Kind-specific envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Contents {
    /// `Status` payload.
    Status(Status),
    /// `Update` payload.
    Update(Update),
    /// `Confirmation` payload.
    Confirmation(Confirmation),
    /// `Metric` payload.
    Metric(Metrics),
}

impl Contents {
    /// Kind tag implied by the payload.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Contents::Status(_) => EnvelopeKind::Status,
            Contents::Update(_) => EnvelopeKind::Update,
            Contents::Confirmation(_) => EnvelopeKind::Confirmation,
            Contents::Metric(_) => EnvelopeKind::Metric,
        }
    }

    fn from_json(kind: EnvelopeKind, raw: JsonValue) -> Result<Self> {
        let shape_err =
            |err: serde_json::Error| MessagingError::MalformedEnvelope(format!("{kind} contents: {err}"));
        Ok(match kind {
            EnvelopeKind::Status => Contents::Status(serde_json::from_value(raw).map_err(shape_err)?),
            EnvelopeKind::Update => Contents::Update(serde_json::from_value(raw).map_err(shape_err)?),
            EnvelopeKind::Confirmation => {
                Contents::Confirmation(serde_json::from_value(raw).map_err(shape_err)?)
            }
            EnvelopeKind::Metric => Contents::Metric(serde_json::from_value(raw).map_err(shape_err)?),
        })
    }
}

impl From<Status> for Contents {
    fn from(value: Status) -> Self {
        Contents::Status(value)
    }
}

impl From<Update> for Contents {
    fn from(value: Update) -> Self {
        Contents::Update(value)
    }
}

impl From<Confirmation> for Contents {
    fn from(value: Confirmation) -> Self {
        Contents::Confirmation(value)
    }
}

impl From<Metrics> for Contents {
    fn from(value: Metrics) -> Self {
        Contents::Metric(value)
    }
}

/// Versioned, kind-tagged message wrapper carried on the bus.
///
/// Envelopes are immutable once built: the kind is derived from the contents
/// so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    version: String,
    kind: EnvelopeKind,
    metadata: BTreeMap<String, String>,
    contents: Contents,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    version: String,
    kind: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    contents: JsonValue,
}

impl Envelope {
    /// Build an envelope stamped with the protocol version and `sender`.
    pub fn new(sender: impl Into<String>, contents: impl Into<Contents>) -> Self {
        let contents = contents.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(SENDER_KEY.to_owned(), sender.into());
        Self {
            version: ENVELOPE_VERSION.to_owned(),
            kind: contents.kind(),
            metadata,
            contents,
        }
    }

    /// `Status` envelope reporting `measurements`.
    pub fn status(sender: impl Into<String>, measurements: Vec<Point>) -> Self {
        Self::new(sender, Status::new(measurements))
    }

    /// `Update` envelope.
    pub fn update(sender: impl Into<String>, update: Update) -> Self {
        Self::new(sender, update)
    }

    /// `Confirmation` envelope.
    pub fn confirmation(
        sender: impl Into<String>,
        confirm: impl Into<String>,
        errors: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            sender,
            Confirmation {
                confirm: confirm.into(),
                errors,
            },
        )
    }

    /// `Metric` envelope batching `metrics`.
    pub fn metrics(sender: impl Into<String>, metrics: Vec<Metric>) -> Self {
        Self::new(sender, Metrics { metrics })
    }

    /// Protocol version carried by the envelope.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Kind tag.
    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    /// Metadata map, always containing `sender`.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Typed payload.
    pub fn contents(&self) -> &Contents {
        &self.contents
    }

    /// Name of the emitting module, empty when absent.
    pub fn sender(&self) -> &str {
        self.metadata
            .get(SENDER_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Whether the envelope was emitted by `name`.
    pub fn is_from(&self, name: &str) -> bool {
        self.sender() == name
    }

    /// `Status` payload, if this is a `Status` envelope.
    pub fn as_status(&self) -> Option<&Status> {
        match &self.contents {
            Contents::Status(status) => Some(status),
            _ => None,
        }
    }

    /// `Update` payload, if this is an `Update` envelope.
    pub fn as_update(&self) -> Option<&Update> {
        match &self.contents {
            Contents::Update(update) => Some(update),
            _ => None,
        }
    }

    /// `Confirmation` payload, if this is a `Confirmation` envelope.
    pub fn as_confirmation(&self) -> Option<&Confirmation> {
        match &self.contents {
            Contents::Confirmation(confirmation) => Some(confirmation),
            _ => None,
        }
    }

    /// `Metric` payload, if this is a `Metric` envelope.
    pub fn as_metrics(&self) -> Option<&Metrics> {
        match &self.contents {
            Contents::Metric(metrics) => Some(metrics),
            _ => None,
        }
    }

    /// Serialize to the JSON wire representation.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Build and serialize an envelope in one step.
pub fn encode(sender: &str, contents: impl Into<Contents>) -> Result<Vec<u8>> {
    Envelope::new(sender, contents).encode()
}

/// Parse an envelope from its wire representation.
///
/// Fails with [`MessagingError::MalformedEnvelope`] when the bytes are not
/// JSON, the kind is unknown, the contents do not match the kind's shape or
/// the metadata lacks a sender.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let wire: WireEnvelope = serde_json::from_slice(bytes)
        .map_err(|err| MessagingError::MalformedEnvelope(err.to_string()))?;
    let kind: EnvelopeKind = wire.kind.parse()?;
    if !wire.metadata.contains_key(SENDER_KEY) {
        return Err(MessagingError::MalformedEnvelope(
            "metadata is missing `sender`".into(),
        ));
    }
    let contents = Contents::from_json(kind, wire.contents)?;
    Ok(Envelope {
        version: if wire.version.is_empty() {
            ENVELOPE_VERSION.to_owned()
        } else {
            wire.version
        },
        kind,
        metadata: wire.metadata,
        contents,
    })
}
