//! ---
//! cosim_section: "03-persistence-logging"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Metrics collection and export utilities."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
mod daemon;
mod http;
mod reporter;

pub use daemon::DaemonMetrics;
pub use http::{new_registry, render_registry, spawn_http_server, MetricsServer, SharedRegistry};
pub use reporter::{qualify_name, MetricsReporter, DEFAULT_REPORT_INTERVAL};

pub use prometheus;
