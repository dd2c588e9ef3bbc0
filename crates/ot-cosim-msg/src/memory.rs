//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use tokio::sync::broadcast;
use tracing::trace;

use crate::frame::Frame;
use crate::transport::FrameSink;
use crate::Result;

const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus with the same fan-out semantics as the broker.
///
/// Every subscriber sees every frame pushed after it subscribed. Frames pushed
/// while nobody listens are dropped, and a lagging subscriber loses the oldest
/// frames instead of slowing publishers down.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    sender: broadcast::Sender<Frame>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryBus {
    /// Create a bus buffering up to `capacity` frames per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every frame published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.sender.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl FrameSink for InMemoryBus {
    fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.sender.send(frame).is_err() {
            trace!("in-memory bus has no subscribers; frame dropped");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_every_subscriber() {
        let bus = InMemoryBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        bus.send_frame(Frame::new("RUNTIME", "x")).unwrap();

        assert_eq!(first.recv().await.unwrap().topic, "RUNTIME");
        assert_eq!(second.recv().await.unwrap().topic, "RUNTIME");
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = InMemoryBus::new(4);
        assert!(bus.send_frame(Frame::new("HEALTH", "y")).is_ok());
    }
}
