//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Contract between the scheduler and a time-coordination engine."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use crate::config::{EndpointDecl, PublicationDecl, SubscriptionDecl};
use crate::error::Result;
use crate::value::Value;
use crate::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicationId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub usize);

/// Message exchanged between endpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub data: Vec<u8>,
    pub time: SimTime,
    pub source: String,
    pub destination: String,
    pub original_source: String,
    pub original_destination: String,
}

impl Message {
    pub fn new(destination: impl Into<String>, data: impl Into<Vec<u8>>, time: SimTime) -> Self {
        Self {
            data: data.into(),
            time,
            destination: destination.into(),
            ..Self::default()
        }
    }
}

/// Request/grant contract of a co-simulation time-coordination engine.
///
/// All calls block; the scheduler drives them from a dedicated thread.
pub trait TimeCoordinator: Send {
    fn register_publication(&mut self, decl: &PublicationDecl) -> Result<PublicationId>;

    fn register_subscription(&mut self, decl: &SubscriptionDecl) -> Result<SubscriptionId>;

    fn register_endpoint(&mut self, decl: &EndpointDecl) -> Result<EndpointId>;

    /// One-time handshake after registration.
    fn enter_executing_mode(&mut self) -> Result<()>;

    /// Ask to advance to `time`. The granted time may be lower when other
    /// federates are not ready yet.
    fn request_time(&mut self, time: SimTime) -> Result<SimTime>;

    fn publish(&mut self, publication: PublicationId, value: &Value) -> Result<()>;

    /// Latest value seen on a subscription, converted to its declared type.
    fn input_value(&mut self, subscription: SubscriptionId) -> Result<Option<Value>>;

    fn send_message(&mut self, endpoint: EndpointId, message: Message) -> Result<()>;

    /// Next pending inbound message, if any.
    fn receive_message(&mut self, endpoint: EndpointId) -> Result<Option<Message>>;

    /// Release every engine resource. Terminal.
    fn finalize(&mut self) -> Result<()>;
}
