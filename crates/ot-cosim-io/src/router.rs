//! ---
//! cosim_section: "09-integration-interoperability"
//! cosim_subsection: "module"
//! cosim_type: "source"
//! cosim_scope: "code"
//! cosim_description: "Bidirectional mapping between federate keys and bus tags."
//! cosim_version: "v0.0.0-prealpha"
//! cosim_owner: "tbd"
//! ---
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("{side} `{name}` maps to both `{existing}` and `{conflicting}`")]
    DuplicateMapping {
        side: &'static str,
        name: String,
        existing: String,
        conflicting: String,
    },
}

/// Lookup table between federate keys and bus tags.
///
/// Every key has exactly one tag. A tag normally has exactly one key as well;
/// [`TagRouterBuilder::allow_fan_out`] lets several keys share a tag, in which
/// case [`TagRouter::key_for_tag`] answers with the first one declared.
#[derive(Debug, Clone, Default)]
pub struct TagRouter {
    tags: IndexMap<String, String>,
    keys: IndexMap<String, String>,
}

impl TagRouter {
    pub fn builder() -> TagRouterBuilder {
        TagRouterBuilder::default()
    }

    pub fn tag_for_key(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn key_for_tag(&self, tag: &str) -> Option<&str> {
        self.keys.get(tag).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// `(key, tag)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, t)| (k.as_str(), t.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagRouterBuilder {
    entries: Vec<(String, String)>,
    allow_fan_out: bool,
}

impl TagRouterBuilder {
    pub fn entry(mut self, key: impl Into<String>, tag: impl Into<String>) -> Self {
        self.entries.push((key.into(), tag.into()));
        self
    }

    pub fn allow_fan_out(mut self, allow: bool) -> Self {
        self.allow_fan_out = allow;
        self
    }

    /// Build the router. Repeating an identical `(key, tag)` pair is accepted.
    pub fn build(self) -> Result<TagRouter, RouterError> {
        let mut router = TagRouter::default();
        for (key, tag) in self.entries {
            if let Some(existing) = router.tags.get(&key) {
                if *existing == tag {
                    continue;
                }
                return Err(RouterError::DuplicateMapping {
                    side: "key",
                    name: key,
                    existing: existing.clone(),
                    conflicting: tag,
                });
            }
            match router.keys.get(&tag) {
                Some(existing) if !self.allow_fan_out => {
                    return Err(RouterError::DuplicateMapping {
                        side: "tag",
                        name: tag,
                        existing: existing.clone(),
                        conflicting: key,
                    });
                }
                Some(_) => {}
                None => {
                    router.keys.insert(tag.clone(), key.clone());
                }
            }
            router.tags.insert(key, tag);
        }
        Ok(router)
    }
}
