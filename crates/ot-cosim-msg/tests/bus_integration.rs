//! ---
//! cosim_section: "02-messaging-ipc-data-model"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Message bus envelopes, frames and transports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::time::Duration;

use ot_cosim_msg::{
    Broker, BrokerMetrics, Envelope, Point, Pusher, Subscriber, Update, TOPIC_HEALTH,
    TOPIC_RUNTIME,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn start_broker() -> anyhow::Result<Broker> {
    Ok(Broker::bind("tcp://127.0.0.1:0", "tcp://127.0.0.1:0", BrokerMetrics::new()?).await?)
}

async fn wait_for_subscribers(broker: &Broker, expected: i64) {
    timeout(Duration::from_secs(5), async {
        while broker.metrics().subscribers() < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscribers registered");
}

#[tokio::test]
async fn status_travels_from_pusher_to_subscriber() -> anyhow::Result<()> {
    let broker = start_broker().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::connect(&format!("tcp://{}", broker.pub_addr()))?;
    subscriber.add_status_handler(move |envelope| {
        let _ = tx.send(envelope.clone());
    });
    let subscription = subscriber.start(TOPIC_RUNTIME);
    wait_for_subscribers(&broker, 1).await;

    let pusher = Pusher::connect(&format!("tcp://{}", broker.pull_addr()))?;
    pusher.push(
        TOPIC_RUNTIME,
        &Envelope::status("module-a", vec![Point::new("temp", 72.5)]),
    )?;

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("status delivered");
    let status = received.as_status().expect("status contents");
    assert_eq!(received.sender(), "module-a");
    assert_eq!(status.measurements.len(), 1);
    assert_eq!(status.measurements[0].tag, "temp");
    assert_eq!(status.measurements[0].value, 72.5);

    subscription.stop().await?;
    pusher.shutdown().await;
    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn topics_are_isolated_and_prefix_matches_are_dropped() -> anyhow::Result<()> {
    let broker = start_broker().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::connect(&broker.pub_addr().to_string())?;
    subscriber.add_update_handler(move |envelope| {
        let _ = tx.send(envelope.clone());
    });
    let subscription = subscriber.start(TOPIC_RUNTIME);
    wait_for_subscribers(&broker, 1).await;

    let pusher = Pusher::connect(&broker.pull_addr().to_string())?;
    let update = |value: f64| Envelope::update("hmi", Update::new(vec![Point::new("valve", value)]));
    pusher.push(TOPIC_HEALTH, &update(1.0))?;
    pusher.push("RUNTIME_SHADOW", &update(2.0))?;
    pusher.push(TOPIC_RUNTIME, &update(3.0))?;

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("update delivered");
    assert_eq!(received.as_update().expect("update").updates[0].value, 3.0);
    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    subscription.stop().await?;
    pusher.shutdown().await;
    broker.stop().await;
    Ok(())
}

#[tokio::test]
async fn per_publisher_order_is_preserved() -> anyhow::Result<()> {
    let broker = start_broker().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::connect(&broker.pub_addr().to_string())?;
    subscriber.add_status_handler(move |envelope| {
        if let Some(status) = envelope.as_status() {
            let _ = tx.send(status.measurements[0].value);
        }
    });
    let subscription = subscriber.start(TOPIC_RUNTIME);
    wait_for_subscribers(&broker, 1).await;

    let pusher = Pusher::connect(&broker.pull_addr().to_string())?;
    for value in 0..50 {
        pusher.push(
            TOPIC_RUNTIME,
            &Envelope::status("ordered", vec![Point::new("seq", f64::from(value))]),
        )?;
    }

    let mut seen = Vec::new();
    while seen.len() < 50 {
        let value = timeout(Duration::from_secs(5), rx.recv())
            .await?
            .expect("frame delivered");
        seen.push(value);
    }
    let expected: Vec<f64> = (0..50).map(f64::from).collect();
    assert_eq!(seen, expected);

    subscription.stop().await?;
    pusher.shutdown().await;
    broker.stop().await;
    Ok(())
}
