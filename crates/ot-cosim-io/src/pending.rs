//! ---
//! cosim_section: "09-integration-interoperability"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Tag updates received from the bus, waiting for the next tick."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Tag values written by the bus update handler and consumed once per tick.
///
/// The lock is only held for a single insert or take, never across a bus or
/// coordinator call. Repeated writes to a tag before the next take keep the
/// last value.
#[derive(Debug, Clone, Default)]
pub struct PendingUpdates {
    inner: Arc<Mutex<IndexMap<String, f64>>>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tag: impl Into<String>, value: f64) {
        self.inner.lock().insert(tag.into(), value);
    }

    pub fn record_all<I, S>(&self, updates: I)
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        for (tag, value) in updates {
            inner.insert(tag.into(), value);
        }
    }

    /// Everything recorded since the previous take, in first-seen order.
    pub fn take(&self) -> IndexMap<String, f64> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_and_take_clears() {
        let pending = PendingUpdates::new();
        pending.record("load", 1.0);
        pending.record_all([("breaker", 1.0), ("load", 2.0)]);
        assert_eq!(pending.len(), 2);

        let taken = pending.take();
        assert_eq!(taken.get("load"), Some(&2.0));
        assert_eq!(taken.keys().collect::<Vec<_>>(), ["load", "breaker"]);
        assert!(pending.is_empty());
        assert!(pending.take().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let writer = PendingUpdates::new();
        let reader = writer.clone();
        std::thread::spawn(move || writer.record("load", 4.5))
            .join()
            .unwrap();
        assert_eq!(reader.take().get("load"), Some(&4.5));
    }
}
