//! ---
//! cosim_section: "09-integration-interoperability"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "I/O module errors."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use ot_cosim_federate::FederateError;
use ot_cosim_msg::MessagingError;

use crate::router::RouterError;

pub type Result<T> = std::result::Result<T, IoModuleError>;

#[derive(Debug, thiserror::Error)]
pub enum IoModuleError {
    #[error("io module `{module}` misconfigured: {reason}")]
    Config { module: String, reason: String },
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Federate(#[from] FederateError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}
