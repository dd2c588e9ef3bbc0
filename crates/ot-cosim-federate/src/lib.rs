//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "01-bootstrap"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Federate scheduling module exports and shared types."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
//! Time-stepped federate scheduling.
//!
//! A [`FederateScheduler`] advances simulated time through a
//! [`TimeCoordinator`] and calls the module's [`FederateHooks`] once per tick.
//! [`LocalFederation`] implements the coordinator contract in-process so
//! modules can run without an external co-simulation engine.

pub mod buffers;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod local;
pub mod scheduler;
pub mod value;

/// Discrete simulated time, in integer engine units.
pub type SimTime = i64;

pub use buffers::{Inbox, Outbox, RecvBuffer, SendBuffer};
pub use config::{EndpointDecl, FederateConfig, PublicationDecl, SubscriptionDecl, TickTimes};
pub use coordinator::{EndpointId, Message, PublicationId, SubscriptionId, TimeCoordinator};
pub use error::{FederateError, Result};
pub use local::{LocalFederate, LocalFederation};
pub use scheduler::{
    FederateHooks, FederateScheduler, RunSummary, SchedulerHandle, SchedulerState, StopFlag,
};
pub use value::{Complex, DataType, NamedPoint, Value};
