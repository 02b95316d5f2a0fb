//! An agent is a stateful, addressable receiver with a lifecycle,
//! defined by three hooks: `started`, `receive`, and `stopped`
//! (`spec.md` §4.4).

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::channel::ChannelReader;
use crate::envelope::Envelope;
use crate::runtime::Runtime;

/// Context handed to every hook: the instance's own address, and a
/// lookup handle back to the runtime used only to address other agents.
/// Agents never hold an owning reference back to the runtime
/// (`spec.md` §9 "cyclic references").
#[derive(Clone)]
pub struct AgentContext {
    pub address: Address,
    pub runtime: Runtime,
}

/// What `Agent::receive` produced.
pub enum Outcome {
    /// Fire-and-forget: no reply is published.
    None,
    /// A single reply, published to `header.reply_to`.
    Reply(Envelope),
    /// A sequence of reply chunks. The driver forwards each as it
    /// arrives and guarantees the sequence ends with exactly one
    /// envelope bearing `terminate=1`, appending a synthetic one if the
    /// producer didn't supply it (`spec.md` §8 "Stream termination").
    Stream(ChannelReader),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "Outcome::None"),
            Self::Reply(_) => write!(f, "Outcome::Reply"),
            Self::Stream(_) => write!(f, "Outcome::Stream"),
        }
    }
}

#[async_trait]
pub trait Agent: Send {
    /// Called once after activation, before the first envelope is
    /// dequeued.
    async fn started(&mut self, _ctx: &AgentContext) {}

    /// Called for each inbound envelope. The runtime guarantees serial
    /// invocation per instance; agents need no internal locking.
    async fn receive(&mut self, envelope: Envelope, ctx: &AgentContext) -> Outcome;

    /// Called once before deactivation (idle reap or replaced spec).
    async fn stopped(&mut self, _ctx: &AgentContext) {}
}

/// Whether a spec's instances are keyed by name alone (one shared
/// instance) or by `(name, session_id)` (one instance per session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instancing {
    /// Stateless responder: `session_id` ignored, one shared instance.
    Singleton,
    /// Conversational: one instance per session, idle-reaped
    /// independently.
    PerSession,
}

/// A factory for fresh `Agent` instances, plus the configuration the
/// runtime needs to activate and deactivate them.
pub type AgentFactory = Arc<dyn Fn() -> Box<dyn Agent> + Send + Sync>;

#[derive(Clone)]
pub struct AgentSpec {
    pub name: String,
    pub instancing: Instancing,
    pub inbox_capacity: usize,
    factory: AgentFactory,
}

impl fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("instancing", &self.instancing)
            .field("inbox_capacity", &self.inbox_capacity)
            .finish()
    }
}

impl AgentSpec {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            instancing: Instancing::Singleton,
            inbox_capacity: 32,
            factory: Arc::new(factory),
        }
    }

    #[must_use]
    pub fn with_instancing(mut self, instancing: Instancing) -> Self {
        self.instancing = instancing;
        self
    }

    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    #[must_use]
    pub fn construct(&self) -> Box<dyn Agent> {
        (self.factory)()
    }
}
