//! ---
//! cosim_section: "09-integration-interoperability"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "I/O module: bus updates in, federate values out and back."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use ot_cosim_common::config::IoConfig;
use ot_cosim_federate::{
    DataType, EndpointDecl, FederateConfig, FederateHooks, FederateScheduler, Message, Outbox,
    PublicationDecl, RecvBuffer, RunSummary, SchedulerHandle, SendBuffer, SimTime,
    SubscriptionDecl, TimeCoordinator, Value,
};
use ot_cosim_metrics::MetricsReporter;
use ot_cosim_msg::{Envelope, MetricKind, Point, Pusher, Subscriber, TOPIC_RUNTIME};
use ot_cosim_rt::TaskHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IoModuleError, Result};
use crate::pending::PendingUpdates;
use crate::router::TagRouter;

/// Local endpoint every routed tag update is sent from.
pub const UPDATES_ENDPOINT: &str = "updates";

pub const METRIC_STATUS_COUNT: &str = "status_count";
pub const METRIC_UPDATE_COUNT: &str = "update_count";
pub const METRIC_FEDERATE_SUB_COUNT: &str = "federate_sub_count";
pub const METRIC_FEDERATE_PUB_UPDATE_COUNT: &str = "federate_pub_update_count";

/// One entry of the JSON array sent to a destination endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUpdate {
    pub tag: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointRoute {
    endpoint: String,
    key: String,
}

/// What the update handler did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    NotAnUpdate,
    OwnEnvelope,
    OtherRecipient,
    Recorded { tags: usize },
}

/// Bridges bus tags and federate topics for one configured device.
#[derive(Debug, Clone)]
pub struct IoModule {
    name: String,
    federate: FederateConfig,
    router: TagRouter,
    routes: IndexMap<String, EndpointRoute>,
    pending: PendingUpdates,
    reporter: MetricsReporter,
    accept_own_updates: bool,
}

impl IoModule {
    pub fn from_config(config: &IoConfig) -> Result<Self> {
        config.validate().map_err(|err| IoModuleError::Config {
            module: config.name.clone(),
            reason: err.to_string(),
        })?;

        let mut federate = FederateConfig::new(config.federate_name()).with_times(
            config.start_time,
            config.end_time,
            config.step_time,
        );
        federate.broker = config.broker_endpoint.clone();
        federate.log_level = config.federate_log_level.clone();

        let mut router = TagRouter::builder();
        for point in &config.subscriptions {
            let data_type = parse_type(&config.name, &point.key, &point.data_type)?;
            federate.subscriptions.push(SubscriptionDecl::new(&point.key, data_type));
            router = router.entry(&point.key, point.resolved_tag());
        }
        for point in &config.publications {
            let data_type = parse_type(&config.name, &point.key, &point.data_type)?;
            federate.publications.push(PublicationDecl {
                global: point.global,
                ..PublicationDecl::new(&point.key, data_type)
            });
            router = router.entry(&point.key, point.resolved_tag());
        }

        let mut routes = IndexMap::new();
        for endpoint in &config.endpoints {
            for tag in &endpoint.tags {
                routes.insert(
                    tag.tag.clone(),
                    EndpointRoute {
                        endpoint: endpoint.name.clone(),
                        key: tag.resolved_key().to_owned(),
                    },
                );
            }
        }
        if !config.endpoints.is_empty() {
            federate.endpoints.push(EndpointDecl::new(UPDATES_ENDPOINT));
        }
        federate.validate()?;

        let reporter = MetricsReporter::new(&config.name);
        reporter.register_metric(
            MetricKind::Counter,
            METRIC_STATUS_COUNT,
            "number of status messages generated",
        );
        reporter.register_metric(
            MetricKind::Counter,
            METRIC_UPDATE_COUNT,
            "number of update messages processed",
        );
        reporter.register_metric(
            MetricKind::Counter,
            METRIC_FEDERATE_SUB_COUNT,
            "number of federate subscriptions processed",
        );
        reporter.register_metric(
            MetricKind::Counter,
            METRIC_FEDERATE_PUB_UPDATE_COUNT,
            "number of federate publication updates generated",
        );

        Ok(Self {
            name: config.name.clone(),
            federate,
            router: router.build()?,
            routes,
            pending: PendingUpdates::new(),
            reporter,
            accept_own_updates: false,
        })
    }

    /// Whether updates this module sent itself are applied. Off by default so
    /// a module never feeds its own traffic back into the federation.
    pub fn accept_own_updates(mut self, accept: bool) -> Self {
        self.accept_own_updates = accept;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn federate_config(&self) -> &FederateConfig {
        &self.federate
    }

    pub fn router(&self) -> &TagRouter {
        &self.router
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn reporter(&self) -> &MetricsReporter {
        &self.reporter
    }

    fn handles_tag(&self, tag: &str) -> bool {
        self.routes.contains_key(tag)
            || self
                .federate
                .publications
                .iter()
                .any(|p| self.router.tag_for_key(&p.name) == Some(tag))
    }

    /// Record the tags of an `Update` envelope for the next tick, answering
    /// with a `Confirmation` when one is requested.
    pub fn handle_update(&self, envelope: &Envelope, pusher: &Pusher) -> UpdateOutcome {
        let Some(update) = envelope.as_update() else {
            return UpdateOutcome::NotAnUpdate;
        };
        if !self.accept_own_updates && envelope.is_from(&self.name) {
            debug!(module = %self.name, "ignoring own update");
            return UpdateOutcome::OwnEnvelope;
        }
        if !update.is_for(&self.name) {
            debug!(module = %self.name, recipient = %update.recipient, "update addressed elsewhere");
            return UpdateOutcome::OtherRecipient;
        }

        self.reporter.increment_counter(METRIC_UPDATE_COUNT);
        self.pending
            .record_all(update.updates.iter().map(|p| (p.tag.clone(), p.value)));

        if !update.confirm.is_empty() {
            let errors: BTreeMap<String, String> = update
                .updates
                .iter()
                .filter(|p| !self.handles_tag(&p.tag))
                .map(|p| (p.tag.clone(), format!("tag not handled by {}", self.name)))
                .collect();
            let confirmation = Envelope::confirmation(&self.name, &update.confirm, errors);
            if let Err(err) = pusher.push(TOPIC_RUNTIME, &confirmation) {
                warn!(module = %self.name, error = %err, "confirmation push failed");
            }
        }
        UpdateOutcome::Recorded {
            tags: update.updates.len(),
        }
    }

    /// Tick hooks publishing through `pusher`.
    pub fn hooks(&self, pusher: Pusher) -> IoHooks {
        let types = self
            .federate
            .publications
            .iter()
            .map(|p| (p.name.clone(), p.data_type))
            .collect();
        IoHooks {
            name: Arc::from(self.name.as_str()),
            router: self.router.clone(),
            types,
            routes: self.routes.clone(),
            pending: self.pending.clone(),
            reporter: self.reporter.clone(),
            pusher,
            tick_updates: IndexMap::new(),
        }
    }

    /// Register the federate on `coordinator`, then subscribe to `RUNTIME`,
    /// start metrics reporting and step the federate. A rejected registration
    /// is returned before any bus task is started.
    pub async fn start<C>(
        self,
        coordinator: C,
        mut subscriber: Subscriber,
        pusher: Pusher,
        report_interval: Duration,
    ) -> Result<IoModuleHandle>
    where
        C: TimeCoordinator + 'static,
    {
        let scheduler =
            FederateScheduler::new(self.federate.clone(), coordinator, self.hooks(pusher.clone()))?
                .start()
                .await?;

        let handler_module = self.clone();
        let handler_pusher = pusher.clone();
        subscriber.add_update_handler(move |envelope| {
            handler_module.handle_update(envelope, &handler_pusher);
        });

        let subscriber = subscriber.start(TOPIC_RUNTIME);
        let reporter = self.reporter.start(pusher.clone(), report_interval);
        info!(module = %self.name, federate = %self.federate.name, "io module started");

        Ok(IoModuleHandle {
            name: self.name,
            subscriber: Some(subscriber),
            reporter: Some(reporter),
            scheduler: Some(scheduler),
            pusher,
        })
    }
}

fn parse_type(module: &str, key: &str, raw: &str) -> Result<DataType> {
    raw.parse::<DataType>().map_err(|_| IoModuleError::Config {
        module: module.to_owned(),
        reason: format!("point `{key}` has unknown data type `{raw}`"),
    })
}

/// Per-tick behaviour of an [`IoModule`].
pub struct IoHooks {
    name: Arc<str>,
    router: TagRouter,
    types: IndexMap<String, DataType>,
    routes: IndexMap<String, EndpointRoute>,
    pending: PendingUpdates,
    reporter: MetricsReporter,
    pusher: Pusher,
    tick_updates: IndexMap<String, f64>,
}

impl FederateHooks for IoHooks {
    fn on_pre_tick(&mut self, _time: SimTime) {
        self.tick_updates = self.pending.take();
    }

    fn on_compute_publications(&mut self, buffer: &mut SendBuffer, _time: SimTime) {
        let topics: Vec<String> = buffer.topics().map(str::to_owned).collect();
        for key in topics {
            let Some(tag) = self.router.tag_for_key(&key) else {
                continue;
            };
            let Some(value) = self.tick_updates.get(tag).copied() else {
                continue;
            };
            let Some(data_type) = self.types.get(&key).copied() else {
                continue;
            };
            match Value::Double(value).coerce(data_type) {
                Ok(converted) => {
                    info!(module = %self.name, topic = %key, %tag, value, "updating federate topic");
                    buffer.set(&key, converted);
                    self.reporter
                        .increment_counter(METRIC_FEDERATE_PUB_UPDATE_COUNT);
                }
                Err(err) => {
                    warn!(module = %self.name, topic = %key, %tag, error = %err, "publication update skipped");
                }
            }
        }
    }

    fn on_compute_endpoint_sends(&mut self, outbox: &mut Outbox, time: SimTime) {
        let mut batches: IndexMap<&str, Vec<EndpointUpdate>> = IndexMap::new();
        for (tag, value) in &self.tick_updates {
            if let Some(route) = self.routes.get(tag) {
                info!(module = %self.name, endpoint = %route.endpoint, key = %route.key, value, "updating federate endpoint");
                batches
                    .entry(route.endpoint.as_str())
                    .or_default()
                    .push(EndpointUpdate {
                        tag: route.key.clone(),
                        value: *value,
                    });
            }
        }
        for (endpoint, batch) in batches {
            match serde_json::to_vec(&batch) {
                Ok(data) => outbox.push(UPDATES_ENDPOINT, Message::new(endpoint, data, time)),
                Err(err) => {
                    warn!(module = %self.name, %endpoint, error = %err, "endpoint batch skipped")
                }
            }
        }
    }

    fn on_compute_subscriptions(&mut self, buffer: &RecvBuffer, _time: SimTime) {
        let mut points = Vec::with_capacity(buffer.len());
        for (key, value) in buffer.iter() {
            let Some(tag) = self.router.tag_for_key(key) else {
                continue;
            };
            let Some(reading) = value.as_f64() else {
                warn!(module = %self.name, topic = %key, %tag, data_type = %value.data_type(), "subscription value has no numeric reading");
                continue;
            };
            points.push(Point::at(tag, reading, 0));
            self.reporter.increment_counter(METRIC_FEDERATE_SUB_COUNT);
        }
        if points.is_empty() {
            return;
        }
        let status = Envelope::status(&*self.name, points);
        match self.pusher.push(TOPIC_RUNTIME, &status) {
            Ok(()) => self.reporter.increment_counter(METRIC_STATUS_COUNT),
            Err(err) => warn!(module = %self.name, error = %err, "status push failed"),
        }
    }

    fn on_post_tick(&mut self, _time: SimTime) {
        self.tick_updates.clear();
    }
}

/// Running [`IoModule`] tasks.
#[derive(Debug)]
pub struct IoModuleHandle {
    name: String,
    subscriber: Option<TaskHandle<()>>,
    reporter: Option<TaskHandle<()>>,
    scheduler: Option<SchedulerHandle>,
    pusher: Pusher,
}

impl IoModuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the federate has run to completion (or failed).
    pub fn federate_finished(&self) -> bool {
        self.scheduler.as_ref().map_or(true, SchedulerHandle::is_finished)
    }

    pub async fn stop_subscriber(&mut self) {
        if let Some(task) = self.subscriber.take() {
            if let Err(err) = task.stop().await {
                warn!(module = %self.name, error = %err, "subscriber task failed");
            }
        }
    }

    pub async fn stop_reporter(&mut self) {
        if let Some(task) = self.reporter.take() {
            if let Err(err) = task.stop().await {
                warn!(module = %self.name, error = %err, "metrics task failed");
            }
        }
    }

    /// Ask the federate to stop and wait for it to finalize.
    pub async fn stop_scheduler(&mut self) -> Option<ot_cosim_federate::Result<RunSummary>> {
        let scheduler = self.scheduler.take()?;
        Some(scheduler.stop().await)
    }

    /// Wait for the federate to reach its end time.
    pub async fn join_scheduler(&mut self) -> Option<ot_cosim_federate::Result<RunSummary>> {
        let scheduler = self.scheduler.take()?;
        Some(scheduler.join().await)
    }

    /// Stop everything in dependency order and flush the push channel.
    pub async fn shutdown(mut self) {
        self.stop_subscriber().await;
        self.stop_reporter().await;
        if let Some(Err(err)) = self.stop_scheduler().await {
            warn!(module = %self.name, error = %err, "federate ended with error");
        }
        self.pusher.shutdown().await;
    }
}
