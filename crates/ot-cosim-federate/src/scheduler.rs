//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Tick loop driving a federate through its time coordinator."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffers::{Inbox, Outbox, RecvBuffer, SendBuffer};
use crate::config::{FederateConfig, PublicationDecl, SubscriptionDecl};
use crate::coordinator::{EndpointId, PublicationId, SubscriptionId, TimeCoordinator};
use crate::error::{FederateError, Result};
use crate::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Stepping,
    Draining,
    Finalized,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Stepping => "stepping",
            SchedulerState::Draining => "draining",
            SchedulerState::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

/// Cooperative stop request, checked before every tick and while waiting for
/// a time grant. A stopped run skips draining.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-tick extension points. Every hook defaults to a no-op; the endpoint
/// hooks only run when the federate declares endpoints.
pub trait FederateHooks: Send {
    fn on_pre_tick(&mut self, _time: SimTime) {}

    fn on_compute_publications(&mut self, _buffer: &mut SendBuffer, _time: SimTime) {}

    fn on_compute_endpoint_sends(&mut self, _outbox: &mut Outbox, _time: SimTime) {}

    fn on_compute_endpoint_receives(&mut self, _inbox: &Inbox, _time: SimTime) {}

    fn on_compute_subscriptions(&mut self, _buffer: &RecvBuffer, _time: SimTime) {}

    fn on_post_tick(&mut self, _time: SimTime) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Ticks whose hooks ran.
    pub ticks: u64,
    pub last_granted: Option<SimTime>,
    /// The run ended because of a stop request.
    pub stopped: bool,
}

/// Drives one federate from registration to finalization.
pub struct FederateScheduler<C, H> {
    config: FederateConfig,
    coordinator: C,
    hooks: H,
    state: SchedulerState,
    stop: StopFlag,
    publications: Vec<(PublicationId, PublicationDecl)>,
    subscriptions: Vec<(SubscriptionId, SubscriptionDecl)>,
    endpoints: Vec<(String, EndpointId)>,
    executing: bool,
}

impl<C, H> fmt::Debug for FederateScheduler<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederateScheduler")
            .field("federate", &self.config.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<C, H> FederateScheduler<C, H>
where
    C: TimeCoordinator,
    H: FederateHooks,
{
    pub fn new(mut config: FederateConfig, coordinator: C, hooks: H) -> Result<Self> {
        config.validate()?;
        config.ensure_name();
        Ok(Self {
            config,
            coordinator,
            hooks,
            state: SchedulerState::Idle,
            stop: StopFlag::default(),
            publications: Vec::new(),
            subscriptions: Vec::new(),
            endpoints: Vec::new(),
            executing: false,
        })
    }

    pub fn config(&self) -> &FederateConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn into_parts(self) -> (C, H) {
        (self.coordinator, self.hooks)
    }

    /// Register every declaration and enter executing mode. A rejected
    /// declaration finalizes the coordinator and is returned, leaving the
    /// scheduler terminal. Calling it again once executing is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != SchedulerState::Idle {
            return Err(FederateError::NotIdle(self.state));
        }
        if self.executing {
            return Ok(());
        }
        info!(
            federate = %self.config.name,
            init = %self.config.init_string(),
            start = self.config.start_time,
            end = self.config.end_time,
            step = self.config.step_time,
            "federate starting"
        );
        if let Err(err) = self.register() {
            warn!(federate = %self.config.name, error = %err, "federate registration failed");
            self.finalize();
            return Err(err);
        }
        self.executing = true;
        Ok(())
    }

    /// Register (unless [`initialize`](Self::initialize) already did), step
    /// through every tick, drain and finalize. Blocks the calling thread for
    /// the whole run.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.initialize()?;

        self.state = SchedulerState::Stepping;
        let summary = match self.step_all() {
            Ok(summary) => summary,
            Err(err) => {
                warn!(federate = %self.config.name, error = %err, "federate run aborted");
                self.finalize();
                return Err(err);
            }
        };

        let behind = summary
            .last_granted
            .map_or(true, |granted| granted < self.config.end_time);
        if !summary.stopped && behind {
            self.state = SchedulerState::Draining;
            if let Err(err) = self.advance_to(self.config.end_time) {
                warn!(federate = %self.config.name, error = %err, "drain failed");
            }
        }
        self.finalize();
        info!(
            federate = %self.config.name,
            ticks = summary.ticks,
            stopped = summary.stopped,
            "federate finished"
        );
        Ok(summary)
    }

    fn register(&mut self) -> Result<()> {
        for decl in &self.config.publications {
            let id = self.coordinator.register_publication(decl)?;
            self.publications.push((id, decl.clone()));
        }
        for decl in &self.config.subscriptions {
            let id = self.coordinator.register_subscription(decl)?;
            self.subscriptions.push((id, decl.clone()));
        }
        for decl in &self.config.endpoints {
            let id = self.coordinator.register_endpoint(decl)?;
            self.endpoints.push((decl.name.clone(), id));
        }
        self.coordinator.enter_executing_mode()
    }

    fn step_all(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut send = SendBuffer::with_topics(self.publications.iter().map(|(_, d)| d.name.clone()));
        let mut outbox = Outbox::default();
        let mut inbox = Inbox::default();
        let mut recv = RecvBuffer::default();

        let ticks = self.config.tick_times();
        for requested in ticks {
            if self.stop.is_requested() {
                summary.stopped = true;
                break;
            }
            let Some(granted) = self.advance_to(requested)? else {
                summary.stopped = true;
                break;
            };
            debug!(federate = %self.config.name, requested, granted, "tick");
            self.tick(granted, &mut send, &mut outbox, &mut inbox, &mut recv);
            summary.ticks += 1;
            summary.last_granted = Some(granted);
        }
        Ok(summary)
    }

    /// Request `time` until the grant reaches it. `None` when a stop request
    /// arrives while waiting.
    fn advance_to(&mut self, time: SimTime) -> Result<Option<SimTime>> {
        loop {
            let granted = self.coordinator.request_time(time)?;
            if granted >= time {
                return Ok(Some(granted));
            }
            if self.stop.is_requested() {
                return Ok(None);
            }
        }
    }

    fn tick(
        &mut self,
        time: SimTime,
        send: &mut SendBuffer,
        outbox: &mut Outbox,
        inbox: &mut Inbox,
        recv: &mut RecvBuffer,
    ) {
        self.hooks.on_pre_tick(time);

        if !self.publications.is_empty() {
            self.hooks.on_compute_publications(send, time);
            self.flush_publications(send);
        }

        if !self.endpoints.is_empty() {
            self.hooks.on_compute_endpoint_sends(outbox, time);
            self.flush_outbox(outbox);
            self.fill_inbox(inbox);
            self.hooks.on_compute_endpoint_receives(inbox, time);
        }

        recv.clear();
        for (id, decl) in &self.subscriptions {
            match self.coordinator.input_value(*id) {
                Ok(Some(value)) => recv.insert(decl.name.clone(), value),
                Ok(None) => {}
                Err(err) => warn!(
                    federate = %self.config.name,
                    topic = %decl.name,
                    error = %err,
                    "subscription read failed; skipping topic"
                ),
            }
        }
        self.hooks.on_compute_subscriptions(recv, time);

        self.hooks.on_post_tick(time);
    }

    fn flush_publications(&mut self, send: &mut SendBuffer) {
        for (index, value) in send.take() {
            let Some((id, decl)) = self.publications.get(index) else {
                continue;
            };
            let published = value
                .coerce(decl.data_type)
                .and_then(|value| self.coordinator.publish(*id, &value));
            if let Err(err) = published {
                warn!(
                    federate = %self.config.name,
                    topic = %decl.name,
                    error = %err,
                    "publication skipped"
                );
            }
        }
    }

    fn flush_outbox(&mut self, outbox: &mut Outbox) {
        for (endpoint, message) in outbox.drain() {
            let Some((_, id)) = self.endpoints.iter().find(|(name, _)| *name == endpoint) else {
                warn!(federate = %self.config.name, %endpoint, "message for undeclared endpoint dropped");
                continue;
            };
            if let Err(err) = self.coordinator.send_message(*id, message) {
                warn!(federate = %self.config.name, %endpoint, error = %err, "endpoint send failed");
            }
        }
    }

    fn fill_inbox(&mut self, inbox: &mut Inbox) {
        inbox.clear();
        for (endpoint, id) in &self.endpoints {
            loop {
                match self.coordinator.receive_message(*id) {
                    Ok(Some(message)) => inbox.push(endpoint, message),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(federate = %self.config.name, %endpoint, error = %err, "endpoint receive failed");
                        break;
                    }
                }
            }
        }
    }

    fn finalize(&mut self) {
        if let Err(err) = self.coordinator.finalize() {
            warn!(federate = %self.config.name, error = %err, "finalize failed");
        }
        self.state = SchedulerState::Finalized;
    }
}

impl<C, H> FederateScheduler<C, H>
where
    C: TimeCoordinator + 'static,
    H: FederateHooks + 'static,
{
    /// Initialize on the blocking thread pool, then keep running there.
    /// Registration errors are returned here, before any tick runs.
    pub async fn start(mut self) -> Result<SchedulerHandle> {
        let initialized = tokio::task::spawn_blocking(move || match self.initialize() {
            Ok(()) => Ok(self),
            Err(err) => Err(err),
        })
        .await
        .map_err(|err| FederateError::Coordinator(format!("initialization task failed: {err}")))??;
        Ok(initialized.spawn())
    }

    /// Run on the blocking thread pool.
    pub fn spawn(mut self) -> SchedulerHandle {
        let stop = self.stop_flag();
        let federate = self.config.name.clone();
        let task = tokio::task::spawn_blocking(move || self.run());
        SchedulerHandle {
            federate,
            stop,
            task,
        }
    }
}

/// Owner of a scheduler running on the blocking pool.
#[derive(Debug)]
pub struct SchedulerHandle {
    federate: String,
    stop: StopFlag,
    task: JoinHandle<Result<RunSummary>>,
}

impl SchedulerHandle {
    pub fn federate(&self) -> &str {
        &self.federate
    }

    pub fn request_stop(&self) {
        self.stop.request();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<RunSummary> {
        self.task
            .await
            .map_err(|err| FederateError::Coordinator(format!("scheduler task failed: {err}")))?
    }

    /// Request a stop and wait for the run to finalize.
    pub async fn stop(self) -> Result<RunSummary> {
        self.request_stop();
        self.join().await
    }
}
