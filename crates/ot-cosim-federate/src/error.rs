//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Federate scheduling errors."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use crate::scheduler::SchedulerState;
use crate::value::DataType;

/// Shared result type for federate operations.
pub type Result<T> = std::result::Result<T, FederateError>;

#[derive(Debug, thiserror::Error)]
pub enum FederateError {
    /// The coordinator rejected a publication, subscription or endpoint.
    #[error("{kind} `{name}` rejected: {reason}")]
    RegistrationFailure {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("invalid federate configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot convert {from} value to {to}")]
    TypeMismatch { from: DataType, to: DataType },
    #[error("time coordinator error: {0}")]
    Coordinator(String),
    #[error("scheduler is {0:?}; only an idle scheduler can run")]
    NotIdle(SchedulerState),
}
