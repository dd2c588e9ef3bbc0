//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Shared primitives and utilities for the co-simulation runtime."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
//! Core shared primitives for the OT co-simulation workspace.
//! This crate exposes configuration loading, logging and time helpers
//! consumed by the bus, federate and module crates.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BrokerConfig, FederationConfig, IoConfig, IoEndpointConfig, IoEndpointTag,
    IoPointConfig, LoadedAppConfig, LoggingConfig, MessageBusConfig, MetricsConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{epoch_millis, stamp_or_now};
