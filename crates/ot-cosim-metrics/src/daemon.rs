//! ---
//! cosim_section: "03-persistence-logging"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Metrics collection and export utilities."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts};

use crate::http::SharedRegistry;

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    io_modules: IntGauge,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "ot_cosimd_starts_total",
            "Total number of times the co-simulation daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ot_cosimd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let io_modules = IntGauge::with_opts(Opts::new(
            "ot_cosimd_io_modules",
            "I/O modules currently running",
        ))?;
        registry.register(Box::new(io_modules.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            io_modules,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_io_modules(&self, count: usize) {
        self.io_modules.set(count as i64);
    }
}
