//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use tracing::debug;

use crate::envelope::Envelope;

/// Direction of the envelope movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Envelope pushed towards the broker.
    Outbound,
    /// Envelope received from a subscription.
    Inbound,
}

/// Emit a structured log entry for envelope activity.
pub fn log_envelope(direction: MessageDirection, topic: &str, envelope: &Envelope) {
    debug!(
        topic = %topic,
        kind = %envelope.kind(),
        sender = %envelope.sender(),
        version = %envelope.version(),
        direction = ?direction,
        "bus activity"
    );
}
