//! ---
//! cosim_section: "11-simulation"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Per-tick buffers handed to federate hooks."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use indexmap::IndexMap;

use crate::coordinator::Message;
use crate::value::Value;

/// Values a module wants published this tick, keyed by publication name.
///
/// Only declared publications have a slot; the scheduler clears every slot
/// after flushing so a value is published at most once.
#[derive(Debug, Clone, Default)]
pub struct SendBuffer {
    slots: IndexMap<String, Option<Value>>,
}

impl SendBuffer {
    pub(crate) fn with_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: topics.into_iter().map(|t| (t.into(), None)).collect(),
        }
    }

    /// Stage `value` for `topic`. Returns false when `topic` is not a
    /// declared publication.
    pub fn set(&mut self, topic: &str, value: impl Into<Value>) -> bool {
        match self.slots.get_mut(topic) {
            Some(slot) => {
                *slot = Some(value.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, topic: &str) -> Option<&Value> {
        self.slots.get(topic).and_then(Option::as_ref)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Staged values in declaration order, leaving every slot empty.
    pub(crate) fn take(&mut self) -> Vec<(usize, Value)> {
        self.slots
            .values_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.take().map(|value| (index, value)))
            .collect()
    }
}

/// Subscription values read at the start of the tick, keyed by subscription
/// name. Subscriptions with no value yet are absent.
#[derive(Debug, Clone, Default)]
pub struct RecvBuffer {
    values: IndexMap<String, Value>,
}

impl RecvBuffer {
    pub(crate) fn insert(&mut self, topic: impl Into<String>, value: Value) {
        self.values.insert(topic.into(), value);
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    pub fn get(&self, topic: &str) -> Option<&Value> {
        self.values.get(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Messages a module wants sent this tick, keyed by local endpoint name.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    messages: Vec<(String, Message)>,
}

impl Outbox {
    pub fn push(&mut self, endpoint: impl Into<String>, message: Message) {
        self.messages.push((endpoint.into(), message));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Message)> {
        self.messages.iter().map(|(endpoint, m)| (endpoint.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (String, Message)> {
        self.messages.drain(..)
    }
}

/// Messages received this tick, keyed by local endpoint name.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    messages: IndexMap<String, Vec<Message>>,
}

impl Inbox {
    pub(crate) fn push(&mut self, endpoint: &str, message: Message) {
        self.messages
            .entry(endpoint.to_owned())
            .or_default()
            .push(message);
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages for `endpoint` in arrival order.
    pub fn get(&self, endpoint: &str) -> &[Message] {
        self.messages.get(endpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Message)> {
        self.messages
            .iter()
            .flat_map(|(endpoint, messages)| messages.iter().map(move |m| (endpoint.as_str(), m)))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_buffer_only_accepts_declared_topics() {
        let mut buffer = SendBuffer::with_topics(["load", "voltage"]);
        assert!(buffer.set("voltage", 1.02));
        assert!(!buffer.set("frequency", 60.0));
        assert_eq!(buffer.get("voltage"), Some(&Value::Double(1.02)));
        assert_eq!(buffer.topics().collect::<Vec<_>>(), vec!["load", "voltage"]);
    }

    #[test]
    fn take_empties_slots_but_keeps_topics() {
        let mut buffer = SendBuffer::with_topics(["load", "voltage"]);
        buffer.set("voltage", 1.0);
        assert_eq!(buffer.take(), vec![(1, Value::Double(1.0))]);
        assert!(buffer.take().is_empty());
        assert!(buffer.set("load", 3_i64));
    }

    #[test]
    fn inbox_groups_by_endpoint() {
        let mut inbox = Inbox::default();
        assert!(inbox.is_empty());
        inbox.push("control", Message::new("io/control", b"a".to_vec(), 1));
        inbox.push("control", Message::new("io/control", b"b".to_vec(), 1));
        assert_eq!(inbox.get("control").len(), 2);
        assert_eq!(inbox.get("control")[1].data, b"b");
        assert!(inbox.get("other").is_empty());
        assert_eq!(inbox.iter().count(), 2);
    }
}
