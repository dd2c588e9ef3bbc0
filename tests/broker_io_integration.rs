//! ---
//! cosim_section: "15-testing-qa-runbook"
//! cosim_subsection: "integration-tests"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "I/O module addressing and confirmations over the TCP broker."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::time::Duration;

use ot_cosim_common::config::{IoConfig, IoPointConfig};
use ot_cosim_federate::{LocalFederation, Value};
use ot_cosim_io::IoModule;
use ot_cosim_msg::frame::{read_frame, write_frame};
use ot_cosim_msg::{
    decode, Broker, BrokerMetrics, Confirmation, Envelope, Frame, Point, Pusher, Subscriber, Update,
    TOPIC_RUNTIME,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn io_config() -> IoConfig {
    IoConfig {
        name: "io".into(),
        end_time: 100_000,
        publications: vec![IoPointConfig {
            key: "breaker".into(),
            data_type: "boolean".into(),
            tag: None,
            global: true,
        }],
        ..IoConfig::default()
    }
}

/// Read RUNTIME frames until a confirmation shows up.
async fn next_confirmation(stream: &mut TcpStream) -> anyhow::Result<(String, Confirmation)> {
    loop {
        let Some(frame) = read_frame(stream).await? else {
            anyhow::bail!("broker closed the subscription");
        };
        let envelope = decode(&frame.payload)?;
        if let Some(confirmation) = envelope.as_confirmation() {
            return Ok((envelope.sender().to_owned(), confirmation.clone()));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn addressed_update_is_confirmed_and_applied() -> anyhow::Result<()> {
    let broker = Broker::bind("tcp://127.0.0.1:0", "tcp://127.0.0.1:0", BrokerMetrics::new()?).await?;
    let pub_endpoint = format!("tcp://{}", broker.pub_addr());
    let pull_endpoint = format!("tcp://{}", broker.pull_addr());

    let mut confirmations = TcpStream::connect(broker.pub_addr()).await?;
    write_frame(&mut confirmations, &Frame::new(TOPIC_RUNTIME, Vec::new())).await?;

    let federation = LocalFederation::with_pacing(Duration::from_millis(2));
    let io = IoModule::from_config(&io_config())?.start(
        federation.join("io"),
        Subscriber::connect(&pub_endpoint)?,
        Pusher::connect(&pull_endpoint)?,
        Duration::from_secs(5),
    )
    .await?;

    timeout(Duration::from_secs(5), async {
        while broker.metrics().subscribers() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let hmi = Pusher::connect(&pull_endpoint)?;
    // addressed to someone else: must not be applied
    hmi.push(
        TOPIC_RUNTIME,
        &Envelope::update(
            "hmi",
            Update::new(vec![Point::new("breaker", 1.0)]).with_recipient("other-io"),
        ),
    )?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(federation.value("breaker"), None);

    hmi.push(
        TOPIC_RUNTIME,
        &Envelope::update(
            "hmi",
            Update::new(vec![Point::new("breaker", 1.0)])
                .with_recipient("io")
                .with_confirm("req-1"),
        ),
    )?;
    let (sender, confirmation) =
        timeout(Duration::from_secs(5), next_confirmation(&mut confirmations)).await??;
    assert_eq!(sender, "io");
    assert_eq!(confirmation.confirm, "req-1");
    assert!(confirmation.errors.is_empty());

    timeout(Duration::from_secs(5), async {
        while federation.value("breaker") != Some(Value::Boolean(true)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    io.shutdown().await;
    hmi.shutdown().await;
    broker.stop().await;
    Ok(())
}
