//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::net::SocketAddr;

use ot_cosim_rt::{ShutdownRx, TaskHandle};
use prometheus::{IntCounter, IntGauge, Opts, Registry};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::frame::{read_frame, write_frame, Frame};
use crate::transport::parse_endpoint;
use crate::Result;

const FANOUT_CAPACITY: usize = 4096;

/// Prometheus metric handles for broker activity.
#[derive(Clone)]
pub struct BrokerMetrics {
    received: IntCounter,
    forwarded: IntCounter,
    dropped: IntCounter,
    subscribers: IntGauge,
}

impl BrokerMetrics {
    /// Create unregistered metric handles.
    pub fn new() -> std::result::Result<Self, prometheus::Error> {
        Ok(Self {
            received: IntCounter::with_opts(Opts::new(
                "bus_frames_received_total",
                "Frames accepted on the pull endpoint",
            ))?,
            forwarded: IntCounter::with_opts(Opts::new(
                "bus_frames_forwarded_total",
                "Frames written to subscribers",
            ))?,
            dropped: IntCounter::with_opts(Opts::new(
                "bus_frames_dropped_total",
                "Frames lost because nobody listened or a subscriber lagged",
            ))?,
            subscribers: IntGauge::with_opts(Opts::new(
                "bus_subscribers",
                "Currently connected subscribers",
            ))?,
        })
    }

    /// Create metric handles and register them with `registry`.
    pub fn register(registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        let metrics = Self::new()?;
        registry.register(Box::new(metrics.received.clone()))?;
        registry.register(Box::new(metrics.forwarded.clone()))?;
        registry.register(Box::new(metrics.dropped.clone()))?;
        registry.register(Box::new(metrics.subscribers.clone()))?;
        Ok(metrics)
    }

    /// Frames accepted so far.
    pub fn frames_received(&self) -> u64 {
        self.received.get()
    }

    /// Frames forwarded so far, summed over subscribers.
    pub fn frames_forwarded(&self) -> u64 {
        self.forwarded.get()
    }

    /// Frames dropped so far.
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Connected subscribers.
    pub fn subscribers(&self) -> i64 {
        self.subscribers.get()
    }
}

/// Bus collector: accepts pushed frames on the pull endpoint and fans them out
/// to subscribers connected on the pub endpoint.
///
/// Subscribers announce their topic filter with an empty-payload frame right
/// after connecting and then receive every frame whose topic starts with it.
pub struct Broker {
    pull_addr: SocketAddr,
    pub_addr: SocketAddr,
    metrics: BrokerMetrics,
    task: TaskHandle<()>,
}

impl Broker {
    /// Bind both endpoints and start serving.
    pub async fn bind(pull_endpoint: &str, pub_endpoint: &str, metrics: BrokerMetrics) -> Result<Self> {
        let pull = TcpListener::bind(parse_endpoint(pull_endpoint)?).await?;
        let publish = TcpListener::bind(parse_endpoint(pub_endpoint)?).await?;
        let pull_addr = pull.local_addr()?;
        let pub_addr = publish.local_addr()?;
        info!(%pull_addr, %pub_addr, "bus broker listening");

        let serve_metrics = metrics.clone();
        let task = TaskHandle::spawn("broker", move |shutdown| {
            serve(pull, publish, serve_metrics, shutdown)
        });
        Ok(Self {
            pull_addr,
            pub_addr,
            metrics,
            task,
        })
    }

    /// Address pushers connect to.
    pub fn pull_addr(&self) -> SocketAddr {
        self.pull_addr
    }

    /// Address subscribers connect to.
    pub fn pub_addr(&self) -> SocketAddr {
        self.pub_addr
    }

    /// Live metric handles.
    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    /// Close both listeners and every open connection.
    pub async fn stop(self) {
        if let Err(err) = self.task.stop().await {
            warn!(error = %err, "broker task failed");
        }
        info!(pull_addr = %self.pull_addr, pub_addr = %self.pub_addr, "bus broker stopped");
    }
}

async fn serve(pull: TcpListener, publish: TcpListener, metrics: BrokerMetrics, mut shutdown: ShutdownRx) {
    let (fanout, _) = broadcast::channel::<Frame>(FANOUT_CAPACITY);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = pull.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "pusher connected");
                    connections.spawn(ingest(stream, peer, fanout.clone(), metrics.clone()));
                }
                Err(err) => warn!(error = %err, "pull accept failed"),
            },
            accepted = publish.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "subscriber connected");
                    connections.spawn(fan_out(stream, peer, fanout.subscribe(), metrics.clone()));
                }
                Err(err) => warn!(error = %err, "pub accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
}

async fn ingest(
    mut stream: TcpStream,
    peer: SocketAddr,
    fanout: broadcast::Sender<Frame>,
    metrics: BrokerMetrics,
) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(frame)) => {
                metrics.received.inc();
                if fanout.send(frame).is_err() {
                    metrics.dropped.inc();
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%peer, error = %err, "dropping pusher connection");
                break;
            }
        }
    }
    debug!(%peer, "pusher disconnected");
}

async fn fan_out(
    stream: TcpStream,
    peer: SocketAddr,
    mut frames: broadcast::Receiver<Frame>,
    metrics: BrokerMetrics,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let filter = match read_frame(&mut reader).await {
        Ok(Some(frame)) => frame.topic,
        Ok(None) => return,
        Err(err) => {
            warn!(%peer, error = %err, "subscriber sent no topic filter");
            return;
        }
    };
    debug!(%peer, %filter, "subscription registered");
    metrics.subscribers.inc();

    loop {
        tokio::select! {
            next = frames.recv() => match next {
                Ok(frame) => {
                    if !frame.topic.starts_with(&filter) {
                        continue;
                    }
                    if let Err(err) = write_frame(&mut writer, &frame).await {
                        debug!(%peer, error = %err, "subscriber write failed");
                        break;
                    }
                    metrics.forwarded.inc();
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    metrics.dropped.inc_by(missed);
                    warn!(%peer, missed, "subscriber lagging; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = read_frame(&mut reader) => match inbound {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
        }
    }
    metrics.subscribers.dec();
    debug!(%peer, %filter, "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_under_expected_names() {
        let registry = Registry::new();
        let metrics = BrokerMetrics::register(&registry).expect("register metrics");
        metrics.received.inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        for expected in [
            "bus_frames_received_total",
            "bus_frames_forwarded_total",
            "bus_frames_dropped_total",
            "bus_subscribers",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected}");
        }
        assert_eq!(metrics.frames_received(), 1);
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_ports() {
        let broker = Broker::bind(
            "tcp://127.0.0.1:0",
            "tcp://127.0.0.1:0",
            BrokerMetrics::new().unwrap(),
        )
        .await
        .expect("bind");
        assert_ne!(broker.pull_addr().port(), 0);
        assert_ne!(broker.pub_addr().port(), 0);
        broker.stop().await;
    }
}
