//! Crate-wide error taxonomy.
//!
//! Every kind listed in the runtime specification's error handling design
//! maps to exactly one variant here. Transport bindings and orchestration
//! agents propagate these with `?` rather than hand-rolling `From` impls.

use crate::address::Address;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Destination name not registered in any reachable runtime.
    #[error("no agent registered for {0}")]
    NoAgent(Address),

    /// Deadline exceeded before a reply, or a first stream chunk, arrived.
    #[error("timed out waiting for a reply from {0}")]
    Timeout(Address),

    /// Reply channel closed by the caller, the transport, or the reaper.
    #[error("channel closed")]
    ChannelClosed,

    /// Connectivity or protocol-level failure of the underlying transport
    /// binding. Broker reconnects are retried internally with backoff
    /// before this is ever surfaced.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A reserved header was missing or malformed, or the payload could
    /// not be decoded by the receiving agent.
    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    /// Raised by an agent's own hooks. The instance that raised it stays
    /// alive; this only ever reaches a caller as an error reply.
    #[error("agent error: {0}")]
    InternalAgentError(String),
}

impl Error {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::Timeout(_))
    }

    /// The stable string used in `header["error"]` when this error is
    /// delivered to a waiting caller as a reply envelope rather than
    /// returned directly (`spec.md` §4.2 "Error envelopes").
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::NoAgent(_) => "no_agent",
            Self::Timeout(_) => "timeout",
            Self::ChannelClosed => "channel_closed",
            Self::TransportFailure(_) => "transport_failure",
            Self::BadEnvelope(_) => "bad_envelope",
            Self::InternalAgentError(_) => "internal_agent_error",
        }
    }
}
