//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "In-process loopback federation."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{EndpointDecl, PublicationDecl, SubscriptionDecl};
use crate::coordinator::{EndpointId, Message, PublicationId, SubscriptionId, TimeCoordinator};
use crate::error::{FederateError, Result};
use crate::value::{DataType, Value};
use crate::SimTime;

#[derive(Debug, Default)]
struct Hub {
    values: HashMap<String, Option<Value>>,
    queues: HashMap<String, VecDeque<Message>>,
}

/// In-process federation: a shared value table plus endpoint queues.
///
/// Every federate joined to the same `LocalFederation` sees the others'
/// publications. Time requests are granted immediately, optionally after a
/// wall-clock pause so a run can be observed at human speed.
#[derive(Debug, Clone, Default)]
pub struct LocalFederation {
    hub: Arc<Mutex<Hub>>,
    pacing: Duration,
}

impl LocalFederation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep `pacing` before granting each time request.
    pub fn with_pacing(pacing: Duration) -> Self {
        Self {
            pacing,
            ..Self::default()
        }
    }

    /// Coordinator handle for a federate called `federate`.
    pub fn join(&self, federate: impl Into<String>) -> LocalFederate {
        LocalFederate {
            name: federate.into(),
            federation: self.clone(),
            publications: Vec::new(),
            subscriptions: Vec::new(),
            endpoints: Vec::new(),
            granted: SimTime::MIN,
            executing: false,
            finalized: false,
        }
    }

    /// Latest value published under `key`.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.hub.lock().values.get(key).cloned().flatten()
    }

    /// Publish `value` under `key` on behalf of a federate outside this process.
    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        self.hub.lock().values.insert(key.into(), Some(value));
    }

    /// Drain every message queued for `endpoint`.
    pub fn take_messages(&self, endpoint: &str) -> Vec<Message> {
        self.hub
            .lock()
            .queues
            .get_mut(endpoint)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Queue `message` for `endpoint`.
    pub fn deliver(&self, endpoint: impl Into<String>, message: Message) {
        self.hub
            .lock()
            .queues
            .entry(endpoint.into())
            .or_default()
            .push_back(message);
    }
}

/// One federate's view of a [`LocalFederation`].
#[derive(Debug)]
pub struct LocalFederate {
    name: String,
    federation: LocalFederation,
    publications: Vec<String>,
    subscriptions: Vec<(String, DataType)>,
    endpoints: Vec<String>,
    granted: SimTime,
    executing: bool,
    finalized: bool,
}

impl LocalFederate {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn scoped(&self, name: &str, global: bool) -> String {
        if global {
            name.to_owned()
        } else {
            format!("{}/{}", self.name, name)
        }
    }

    fn ensure_configuring(&self, kind: &'static str, name: &str) -> Result<()> {
        if self.executing || self.finalized {
            return Err(FederateError::RegistrationFailure {
                kind,
                name: name.to_owned(),
                reason: "federate already left configuration mode".into(),
            });
        }
        if name.trim().is_empty() {
            return Err(FederateError::RegistrationFailure {
                kind,
                name: name.to_owned(),
                reason: "empty name".into(),
            });
        }
        Ok(())
    }

    fn ensure_executing(&self) -> Result<()> {
        if self.finalized {
            return Err(FederateError::Coordinator(format!(
                "federate `{}` is finalized",
                self.name
            )));
        }
        if !self.executing {
            return Err(FederateError::Coordinator(format!(
                "federate `{}` has not entered executing mode",
                self.name
            )));
        }
        Ok(())
    }

    fn lookup<'a, T>(items: &'a [T], index: usize, what: &str) -> Result<&'a T> {
        items
            .get(index)
            .ok_or_else(|| FederateError::Coordinator(format!("unknown {what} handle {index}")))
    }
}

impl TimeCoordinator for LocalFederate {
    fn register_publication(&mut self, decl: &PublicationDecl) -> Result<PublicationId> {
        self.ensure_configuring("publication", &decl.name)?;
        let key = self.scoped(&decl.name, decl.global);
        let mut hub = self.federation.hub.lock();
        if hub.values.contains_key(&key) {
            return Err(FederateError::RegistrationFailure {
                kind: "publication",
                name: key,
                reason: "key already registered in the federation".into(),
            });
        }
        hub.values.insert(key.clone(), None);
        drop(hub);
        debug!(federate = %self.name, %key, data_type = %decl.data_type, "publication registered");
        self.publications.push(key);
        Ok(PublicationId(self.publications.len() - 1))
    }

    fn register_subscription(&mut self, decl: &SubscriptionDecl) -> Result<SubscriptionId> {
        self.ensure_configuring("subscription", &decl.name)?;
        if self.subscriptions.iter().any(|(key, _)| key == &decl.name) {
            return Err(FederateError::RegistrationFailure {
                kind: "subscription",
                name: decl.name.clone(),
                reason: "already subscribed".into(),
            });
        }
        debug!(federate = %self.name, key = %decl.name, data_type = %decl.data_type, "subscription registered");
        self.subscriptions.push((decl.name.clone(), decl.data_type));
        Ok(SubscriptionId(self.subscriptions.len() - 1))
    }

    fn register_endpoint(&mut self, decl: &EndpointDecl) -> Result<EndpointId> {
        self.ensure_configuring("endpoint", &decl.name)?;
        let key = self.scoped(&decl.name, decl.global);
        if self.endpoints.contains(&key) {
            return Err(FederateError::RegistrationFailure {
                kind: "endpoint",
                name: key,
                reason: "endpoint already registered".into(),
            });
        }
        self.federation.hub.lock().queues.entry(key.clone()).or_default();
        debug!(federate = %self.name, %key, "endpoint registered");
        self.endpoints.push(key);
        Ok(EndpointId(self.endpoints.len() - 1))
    }

    fn enter_executing_mode(&mut self) -> Result<()> {
        if self.finalized {
            return Err(FederateError::Coordinator("federate is finalized".into()));
        }
        self.executing = true;
        info!(federate = %self.name, "entered executing mode");
        Ok(())
    }

    fn request_time(&mut self, time: SimTime) -> Result<SimTime> {
        self.ensure_executing()?;
        if !self.federation.pacing.is_zero() {
            std::thread::sleep(self.federation.pacing);
        }
        self.granted = self.granted.max(time);
        Ok(self.granted)
    }

    fn publish(&mut self, publication: PublicationId, value: &Value) -> Result<()> {
        self.ensure_executing()?;
        let key = Self::lookup(&self.publications, publication.0, "publication")?;
        self.federation
            .hub
            .lock()
            .values
            .insert(key.clone(), Some(value.clone()));
        Ok(())
    }

    fn input_value(&mut self, subscription: SubscriptionId) -> Result<Option<Value>> {
        self.ensure_executing()?;
        let (key, data_type) = Self::lookup(&self.subscriptions, subscription.0, "subscription")?;
        match self.federation.value(key) {
            Some(value) => value.coerce(*data_type).map(Some),
            None => Ok(None),
        }
    }

    fn send_message(&mut self, endpoint: EndpointId, mut message: Message) -> Result<()> {
        self.ensure_executing()?;
        let source = Self::lookup(&self.endpoints, endpoint.0, "endpoint")?.clone();
        if message.original_source.is_empty() {
            message.original_source = source.clone();
        }
        if message.original_destination.is_empty() {
            message.original_destination = message.destination.clone();
        }
        message.source = source;
        let destination = message.destination.clone();
        self.federation.deliver(destination, message);
        Ok(())
    }

    fn receive_message(&mut self, endpoint: EndpointId) -> Result<Option<Message>> {
        self.ensure_executing()?;
        let key = Self::lookup(&self.endpoints, endpoint.0, "endpoint")?;
        Ok(self
            .federation
            .hub
            .lock()
            .queues
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    fn finalize(&mut self) -> Result<()> {
        if !self.finalized {
            self.finalized = true;
            self.executing = false;
            info!(federate = %self.name, granted = self.granted, "federate finalized");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publications_are_visible_to_other_federates() {
        let federation = LocalFederation::new();
        let mut source = federation.join("plant");
        let mut sink = federation.join("io");
        let publication = source
            .register_publication(&PublicationDecl::new("load", DataType::Double))
            .unwrap();
        let subscription = sink
            .register_subscription(&SubscriptionDecl::new("plant/load", DataType::Int))
            .unwrap();
        source.enter_executing_mode().unwrap();
        sink.enter_executing_mode().unwrap();

        assert_eq!(sink.input_value(subscription).unwrap(), None);
        source.publish(publication, &Value::Double(41.9)).unwrap();
        assert_eq!(sink.input_value(subscription).unwrap(), Some(Value::Int(41)));
        assert_eq!(federation.value("plant/load"), Some(Value::Double(41.9)));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let federation = LocalFederation::new();
        let mut first = federation.join("a");
        let mut second = federation.join("b");
        first
            .register_publication(&PublicationDecl::global("shared", DataType::Double))
            .unwrap();
        let err = second
            .register_publication(&PublicationDecl::global("shared", DataType::Double))
            .unwrap_err();
        assert!(matches!(err, FederateError::RegistrationFailure { .. }));
    }

    #[test]
    fn registration_closes_after_executing() {
        let federation = LocalFederation::new();
        let mut federate = federation.join("a");
        federate.enter_executing_mode().unwrap();
        assert!(federate
            .register_endpoint(&EndpointDecl::new("late"))
            .is_err());
    }

    #[test]
    fn requests_are_granted_monotonically() {
        let federation = LocalFederation::new();
        let mut federate = federation.join("a");
        assert!(federate.request_time(1).is_err());
        federate.enter_executing_mode().unwrap();
        assert_eq!(federate.request_time(3).unwrap(), 3);
        assert_eq!(federate.request_time(2).unwrap(), 3);
        federate.finalize().unwrap();
        assert!(federate.request_time(4).is_err());
    }

    #[test]
    fn messages_flow_between_endpoints() {
        let federation = LocalFederation::new();
        let mut sender = federation.join("io");
        let mut receiver = federation.join("plant");
        let out = sender.register_endpoint(&EndpointDecl::new("updates")).unwrap();
        let inbound = receiver.register_endpoint(&EndpointDecl::new("control")).unwrap();
        sender.enter_executing_mode().unwrap();
        receiver.enter_executing_mode().unwrap();

        sender
            .send_message(out, Message::new("plant/control", b"[]".to_vec(), 4))
            .unwrap();
        let message = receiver.receive_message(inbound).unwrap().expect("queued");
        assert_eq!(message.source, "io/updates");
        assert_eq!(message.original_destination, "plant/control");
        assert_eq!(message.time, 4);
        assert!(receiver.receive_message(inbound).unwrap().is_none());
    }
}
