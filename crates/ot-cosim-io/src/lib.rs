//! ---
//! cosim_section: "09-integration-interoperability"
//! cosim_subsection: "01-bootstrap"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "I/O module exports."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
//! Bus-to-federate I/O modules.
//!
//! An [`IoModule`] listens for `Update` envelopes on the bus, feeds the
//! updated tags into its federate's publications and endpoints on the next
//! tick, and reports subscription values back to the bus as `Status`
//! envelopes.

pub mod error;
pub mod module;
pub mod pending;
pub mod router;

pub use error::{IoModuleError, Result};
pub use module::{
    EndpointUpdate, IoHooks, IoModule, IoModuleHandle, UpdateOutcome, METRIC_FEDERATE_PUB_UPDATE_COUNT,
    METRIC_FEDERATE_SUB_COUNT, METRIC_STATUS_COUNT, METRIC_UPDATE_COUNT, UPDATES_ENDPOINT,
};
pub use pending::PendingUpdates;
pub use router::{RouterError, TagRouter, TagRouterBuilder};
