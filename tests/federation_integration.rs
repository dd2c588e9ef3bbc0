//! ---
//! cosim_section: "15-testing-qa-runbook"
//! cosim_subsection: "integration-tests"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "I/O module and plant federate exchanging values over a loopback federation."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ot_cosim_common::config::{IoConfig, IoEndpointConfig, IoEndpointTag, IoPointConfig};
use ot_cosim_federate::{
    DataType, EndpointDecl, FederateConfig, FederateHooks, FederateScheduler, Inbox,
    LocalFederation, PublicationDecl, RecvBuffer, SendBuffer, SimTime, SubscriptionDecl, Value,
};
use ot_cosim_io::{EndpointUpdate, IoModule};
use ot_cosim_msg::{
    decode, Envelope, Frame, InMemoryBus, Point, Pusher, Subscriber, Update, TOPIC_HEALTH,
    TOPIC_RUNTIME,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

#[derive(Default)]
struct Observed {
    setpoints: Vec<f64>,
    control: Vec<EndpointUpdate>,
}

/// Stand-in for a physical plant: publishes a load derived from time and
/// records what the I/O module sends back.
struct Plant {
    observed: Arc<Mutex<Observed>>,
}

impl FederateHooks for Plant {
    fn on_compute_publications(&mut self, buffer: &mut SendBuffer, time: SimTime) {
        buffer.set("load", 100.0 + time as f64);
    }

    fn on_compute_endpoint_receives(&mut self, inbox: &Inbox, _time: SimTime) {
        let mut observed = self.observed.lock();
        for message in inbox.get("control") {
            if let Ok(batch) = serde_json::from_slice::<Vec<EndpointUpdate>>(&message.data) {
                observed.control.extend(batch);
            }
        }
    }

    fn on_compute_subscriptions(&mut self, buffer: &RecvBuffer, _time: SimTime) {
        if let Some(Value::Double(value)) = buffer.get("io/setpoint") {
            let mut observed = self.observed.lock();
            if observed.setpoints.last() != Some(value) {
                observed.setpoints.push(*value);
            }
        }
    }
}

fn point(key: &str, data_type: &str) -> IoPointConfig {
    IoPointConfig {
        key: key.to_owned(),
        data_type: data_type.to_owned(),
        tag: None,
        global: false,
    }
}

fn io_config() -> IoConfig {
    IoConfig {
        name: "io".into(),
        end_time: 100_000,
        subscriptions: vec![point("plant/load", "double")],
        publications: vec![IoPointConfig {
            tag: Some("setpoint".into()),
            ..point("setpoint", "double")
        }],
        endpoints: vec![IoEndpointConfig {
            name: "plant/control".into(),
            tags: vec![IoEndpointTag {
                tag: "valve".into(),
                key: Some("valve_position".into()),
            }],
        }],
        ..IoConfig::default()
    }
}

fn plant_config() -> FederateConfig {
    FederateConfig::new("plant")
        .with_times(1, 100_000, 1)
        .with_publication(PublicationDecl::new("load", DataType::Double))
        .with_subscription(SubscriptionDecl::new("io/setpoint", DataType::Double))
        .with_endpoint(EndpointDecl::new("control"))
}

async fn next_frame(frames: &mut Receiver<Frame>, topic: &str) -> Frame {
    loop {
        match frames.recv().await {
            Ok(frame) if frame.topic == topic => return frame,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("bus closed"),
        }
    }
}

async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bus_updates_reach_the_plant_and_plant_values_reach_the_bus() -> anyhow::Result<()> {
    let bus = InMemoryBus::default();
    let mut frames = bus.subscribe();
    let federation = LocalFederation::with_pacing(Duration::from_millis(2));
    let observed = Arc::new(Mutex::new(Observed::default()));

    let plant = FederateScheduler::new(
        plant_config(),
        federation.join("plant"),
        Plant {
            observed: observed.clone(),
        },
    )?
    .spawn();

    let module = IoModule::from_config(&io_config())?;
    let io = module.start(
        federation.join("io"),
        Subscriber::in_memory(&bus),
        Pusher::in_memory(&bus),
        Duration::from_millis(50),
    )
    .await?;

    // plant load shows up on the bus, tagged by the router
    let status = loop {
        let frame = next_frame(&mut frames, TOPIC_RUNTIME).await;
        let envelope = decode(&frame.payload)?;
        if envelope.is_from("io") && envelope.as_status().is_some() {
            break envelope;
        }
    };
    let measurement = &status.as_status().expect("status").measurements[0];
    assert_eq!(measurement.tag, "load");
    assert!(measurement.value > 100.0);
    assert_eq!(measurement.timestamp, 0);

    let hmi = Pusher::in_memory(&bus);
    hmi.push(
        TOPIC_RUNTIME,
        &Envelope::update(
            "hmi",
            Update::new(vec![Point::new("setpoint", 42.0), Point::new("valve", 0.5)]),
        ),
    )?;

    wait_until(|| {
        let observed = observed.lock();
        observed.setpoints.contains(&42.0) && !observed.control.is_empty()
    })
    .await;
    {
        let observed = observed.lock();
        assert_eq!(
            observed.control,
            vec![EndpointUpdate {
                tag: "valve_position".into(),
                value: 0.5
            }]
        );
    }

    let health = loop {
        let frame = next_frame(&mut frames, TOPIC_HEALTH).await;
        let envelope = decode(&frame.payload)?;
        let updates = envelope
            .as_metrics()
            .and_then(|m| m.metrics.iter().find(|m| m.name == "io_update_count"))
            .map(|m| m.value)
            .unwrap_or_default();
        if updates >= 1.0 {
            break envelope;
        }
    };
    assert_eq!(health.sender(), "io");

    io.shutdown().await;
    let summary = plant.stop().await?;
    assert!(summary.stopped);
    assert!(summary.ticks > 0);
    Ok(())
}

#[tokio::test]
async fn federates_run_to_end_time_without_a_bus() -> anyhow::Result<()> {
    let federation = LocalFederation::new();
    let observed = Arc::new(Mutex::new(Observed::default()));
    federation.set_value("io/setpoint", Value::Int(7));

    let config = plant_config().with_times(1, 20, 2);
    let summary = FederateScheduler::new(
        config,
        federation.join("plant"),
        Plant {
            observed: observed.clone(),
        },
    )?
    .spawn()
    .join()
    .await?;

    assert_eq!(summary.ticks, 10);
    assert_eq!(summary.last_granted, Some(19));
    assert!(!summary.stopped);
    assert_eq!(federation.value("plant/load"), Some(Value::Double(119.0)));
    // int published upstream, read back through a double subscription
    assert_eq!(observed.lock().setpoints, vec![7.0]);
    Ok(())
}
