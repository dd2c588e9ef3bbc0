//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Per-instance federate configuration."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FederateError, Result};
use crate::value::DataType;
use crate::SimTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Global publications are addressed by their bare name; the others are
    /// prefixed with the federate name.
    #[serde(default)]
    pub global: bool,
}

impl PublicationDecl {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            global: false,
        }
    }

    pub fn global(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            global: true,
            ..Self::new(name, data_type)
        }
    }
}

/// Subscriptions always target a publication key as seen federation-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl SubscriptionDecl {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDecl {
    pub name: String,
    /// Free-form endpoint type label passed to the coordinator.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub global: bool,
}

impl EndpointDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: String::new(),
            global: false,
        }
    }
}

/// Everything a scheduler needs to join a federation. Each module instance
/// owns its own copy; nothing is shared between instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederateConfig {
    /// Federate name; an empty name is replaced by a random UUID.
    pub name: String,
    pub broker: String,
    pub log_level: String,
    pub start_time: SimTime,
    pub end_time: SimTime,
    pub step_time: SimTime,
    pub publications: Vec<PublicationDecl>,
    pub subscriptions: Vec<SubscriptionDecl>,
    pub endpoints: Vec<EndpointDecl>,
}

impl Default for FederateConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            broker: "127.0.0.1".to_owned(),
            log_level: "SUMMARY".to_owned(),
            start_time: 1,
            end_time: 3600,
            step_time: 1,
            publications: Vec::new(),
            subscriptions: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}

impl FederateConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_times(mut self, start: SimTime, end: SimTime, step: SimTime) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.step_time = step;
        self
    }

    pub fn with_publication(mut self, decl: PublicationDecl) -> Self {
        self.publications.push(decl);
        self
    }

    pub fn with_subscription(mut self, decl: SubscriptionDecl) -> Self {
        self.subscriptions.push(decl);
        self
    }

    pub fn with_endpoint(mut self, decl: EndpointDecl) -> Self {
        self.endpoints.push(decl);
        self
    }

    /// Assign a random name when none was configured and return the result.
    pub fn ensure_name(&mut self) -> &str {
        if self.name.trim().is_empty() {
            self.name = Uuid::new_v4().to_string();
        }
        &self.name
    }

    /// Core init string handed to the co-simulation engine.
    pub fn init_string(&self) -> String {
        format!(
            "--federates=1 --broker={} --loglevel={}",
            self.broker, self.log_level
        )
    }

    /// Key a publication is visible under federation-wide.
    pub fn publication_key(&self, decl: &PublicationDecl) -> String {
        scoped_key(&self.name, &decl.name, decl.global)
    }

    /// Key an endpoint is reachable under federation-wide.
    pub fn endpoint_key(&self, decl: &EndpointDecl) -> String {
        scoped_key(&self.name, &decl.name, decl.global)
    }

    /// Simulated times visited by the tick loop: `start..=end` by `step`.
    pub fn tick_times(&self) -> TickTimes {
        TickTimes {
            next: Some(self.start_time),
            end: self.end_time,
            step: self.step_time.max(1),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_time <= 0 {
            return Err(FederateError::InvalidConfig(format!(
                "step_time must be positive, got {}",
                self.step_time
            )));
        }
        if self.end_time < self.start_time {
            return Err(FederateError::InvalidConfig(format!(
                "end_time {} precedes start_time {}",
                self.end_time, self.start_time
            )));
        }
        unique("publication", self.publications.iter().map(|p| p.name.as_str()))?;
        unique("subscription", self.subscriptions.iter().map(|s| s.name.as_str()))?;
        unique("endpoint", self.endpoints.iter().map(|e| e.name.as_str()))?;
        Ok(())
    }
}

fn scoped_key(federate: &str, name: &str, global: bool) -> String {
    if global {
        name.to_owned()
    } else {
        format!("{federate}/{name}")
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(FederateError::InvalidConfig(format!("{kind} with empty name")));
        }
        if !seen.insert(name) {
            return Err(FederateError::InvalidConfig(format!(
                "duplicate {kind} `{name}`"
            )));
        }
    }
    Ok(())
}

/// Lazy tick schedule. Stops at `end` or when the next time would overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTimes {
    next: Option<SimTime>,
    end: SimTime,
    step: SimTime,
}

impl Iterator for TickTimes {
    type Item = SimTime;

    fn next(&mut self) -> Option<SimTime> {
        let current = self.next.filter(|t| *t <= self.end)?;
        self.next = current.checked_add(self.step);
        Some(current)
    }
}
