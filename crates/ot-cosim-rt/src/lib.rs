//! ---
//! cosim_section: "01-core-functionality"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Runtime helpers supporting bus and federate loops."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
//! Runtime helpers shared by the bus, metrics and federate crates: explicit task
//! handles with a stop-and-join contract, a fixed-cadence ticker and the process
//! shutdown signal.

pub mod scheduling;
pub mod signal;
pub mod task;

pub use scheduling::Ticker;
pub use signal::shutdown_signal;
pub use task::{ShutdownRx, TaskHandle};
