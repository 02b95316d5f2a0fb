//! Addressing: the `(name, id, type)` triple every envelope is routed by.
//!
//! `name` is the agent's registered identifier and may itself contain `.`
//! to express a hierarchical namespace (`team.billing`). `id` is an
//! instance discriminator; empty means "any instance of this name" (the
//! address *targets a name*). `type` is an optional hint some transports
//! use for topic fan-out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder reserved for an empty component that precedes a non-empty
/// one in the wire form, e.g. `name..type` when `id` is empty but `type`
/// isn't. Never valid inside a real `name`/`id`/`type` component.
const EMPTY_MARKER: &str = "~";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub r#type: String,
}

impl Address {
    #[must_use]
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
            r#type: String::new(),
        }
    }

    #[must_use]
    pub fn for_session(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            r#type: String::new(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, r#type: impl Into<String>) -> Self {
        self.r#type = r#type.into();
        self
    }

    /// An address targets a name when its `id` is empty.
    #[must_use]
    pub fn targets_name(&self) -> bool {
        self.id.is_empty()
    }

    /// An address targets a session when its `id` is set.
    #[must_use]
    pub fn targets_session(&self) -> bool {
        !self.id.is_empty()
    }

    /// `name.id.type` with empty components elided, as used for broker
    /// subject derivation (`spec.md` §4.2).
    #[must_use]
    pub fn topic(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        if !self.id.is_empty() {
            parts.push(self.id.as_str());
        }
        if !self.r#type.is_empty() {
            parts.push(self.r#type.as_str());
        }
        parts.join(".")
    }

    /// Whether this address matches `other` for routing purposes: all
    /// three fields equal.
    #[must_use]
    pub fn matches(&self, other: &Address) -> bool {
        self == other
    }
}

impl fmt::Display for Address {
    /// `name[.id][.type]`, reserving `~` as an explicit empty-component
    /// marker when a later component is present but an earlier one isn't.
    ///
    /// Round-tripping through `Display`/`FromStr` is exact for addresses
    /// agentcore itself generates (reply inboxes, discovery subjects),
    /// whose `name` never contains a literal `.`. For user-registered
    /// hierarchical names (`team.billing`) with an empty `id`/`type`,
    /// `Display` elides trailing empties and is therefore ambiguous to
    /// parse back — callers that need both dotted names *and* a
    /// recoverable `id`/`type` should carry the `Address` struct itself
    /// rather than round-tripping it through text. See DESIGN.md.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.id.is_empty() || !self.r#type.is_empty() {
            let id = if self.id.is_empty() {
                EMPTY_MARKER
            } else {
                self.id.as_str()
            };
            write!(f, ".{id}")?;
        }
        if !self.r#type.is_empty() {
            write!(f, ".{}", self.r#type)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(crate::error::Error::BadEnvelope(
                "empty address".to_string(),
            ));
        }
        let mut parts = s.rsplitn(3, '.');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        let third = parts.next();

        let (name, id, r#type) = match (third, second) {
            (Some(name), Some(id)) => (name.to_string(), id.to_string(), first.to_string()),
            (None, Some(name)) => (name.to_string(), first.to_string(), String::new()),
            _ => (first.to_string(), String::new(), String::new()),
        };
        let id = if id == EMPTY_MARKER { String::new() } else { id };
        Ok(Self { name, id, r#type })
    }
}
