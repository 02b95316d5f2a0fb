//! The built-in `discovery` agent: answers namespace-prefix queries
//! against the local registry. Registered automatically by every
//! `Runtime` (`spec.md` §4.5).
//!
//! Aggregating replies from multiple runtimes sharing a broker subject
//! is the caller's job, not the agent's: [`query_discovery`] publishes a
//! query with `reply_to` set and collects distinct names until either
//! `discovery_aggregate_timeout` elapses or `discovery_max_replies`
//! distinct names have been seen, since a broadcast subscription yields
//! zero or more independent replies rather than one terminated stream.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::address::Address;
use crate::agent::{Agent, AgentContext, Outcome};
use crate::envelope::{Envelope, HDR_REPLY_TO};
use crate::error::Result;
use crate::runtime::Runtime;
use crate::transport::Transport;

pub const DISCOVERY_NAME: &str = "discovery";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryReply {
    pub names: Vec<String>,
}

/// Stateless responder over the runtime's own registry.
pub struct Discovery;

impl Discovery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for Discovery {
    #[instrument(skip_all)]
    async fn receive(&mut self, envelope: Envelope, ctx: &AgentContext) -> Outcome {
        let query: DiscoveryQuery = match serde_json::from_slice(&envelope.payload) {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "malformed discovery query");
                return Outcome::Reply(Envelope::error("bad_envelope", e.to_string()));
            }
        };

        let names = match ctx.runtime.list_names(&query.namespace).await {
            Ok(names) => names,
            Err(e) => return Outcome::Reply(Envelope::error("internal_agent_error", e.to_string())),
        };

        let reply = DiscoveryReply { names };
        match serde_json::to_vec(&reply) {
            Ok(bytes) => Outcome::Reply(Envelope::new(Bytes::from(bytes))),
            Err(e) => Outcome::Reply(Envelope::error("internal_agent_error", e.to_string())),
        }
    }
}

/// Publishes a discovery query and aggregates distinct names from
/// however many runtimes answer within `timeout`, de-duplicating by
/// name (`spec.md` §4.5, §8 "Discovery" scenario).
///
/// # Errors
/// Returns `Error::TransportFailure` if the query can't be published at
/// all.
pub async fn query_discovery(
    runtime: &Runtime,
    namespace: &str,
    timeout: Duration,
    max_replies: usize,
) -> Result<Vec<String>> {
    let transport = runtime.transport();
    let (reply_address, mut reader) = transport.open_reply_channel().await?;

    let query = DiscoveryQuery {
        namespace: namespace.to_string(),
        detailed: false,
    };
    let payload = serde_json::to_vec(&query).unwrap_or_default();
    let envelope = Envelope::new(Bytes::from(payload)).with(HDR_REPLY_TO, reply_address.to_string());
    transport
        .publish(envelope, &Address::for_name(DISCOVERY_NAME), false)
        .await?;

    let mut names = BTreeSet::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while names.len() < max_replies {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, reader.recv()).await {
            Ok(Some(envelope)) => {
                if let Ok(reply) = serde_json::from_slice::<DiscoveryReply>(&envelope.payload) {
                    names.extend(reply.names);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    Ok(names.into_iter().collect())
}
