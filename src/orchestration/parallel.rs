//! Parallel fan-out with an aggregator: `[a1, …, an]` receive the same
//! envelope concurrently, tagged replies (or tagged errors) are handed
//! to `aggregator` as a single envelope, whose reply is returned
//! (`spec.md` §4.6).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

use super::forward;
use crate::address::Address;
use crate::agent::{Agent, AgentContext, Outcome};
use crate::channel::Reply;
use crate::envelope::Envelope;
use crate::transport::ChannelOptions;

/// One branch's outcome, tagged with the branch's agent name so the
/// aggregator can tell results apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub name: String,
    /// Base64-encoded reply payload; absent when `error` is set.
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BranchResult {
    #[must_use]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload
            .as_deref()
            .and_then(|p| BASE64.decode(p).ok())
            .map(Bytes::from)
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct Parallel {
    branches: Vec<String>,
    aggregator: String,
    branch_timeout: Duration,
    overall_deadline: Duration,
}

impl Parallel {
    #[must_use]
    pub fn new(branches: Vec<String>, aggregator: impl Into<String>) -> Self {
        Self {
            branches,
            aggregator: aggregator.into(),
            branch_timeout: Duration::from_secs(30),
            overall_deadline: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_branch_timeout(mut self, timeout: Duration) -> Self {
        self.branch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_overall_deadline(mut self, deadline: Duration) -> Self {
        self.overall_deadline = deadline;
        self
    }
}

#[async_trait]
impl Agent for Parallel {
    #[instrument(skip_all, fields(branches = ?self.branches, aggregator = %self.aggregator))]
    async fn receive(&mut self, envelope: Envelope, ctx: &AgentContext) -> Outcome {
        let outgoing = forward(&envelope);
        let branch_timeout = self.branch_timeout;

        let calls = self.branches.iter().map(|name| {
            let destination = Address::for_name(name.clone());
            let envelope = outgoing.clone();
            let runtime = ctx.runtime.clone();
            let name = name.clone();
            async move {
                let opts = ChannelOptions::unary(branch_timeout);
                let result = runtime.channel(&destination, envelope, opts).await;
                branch_result(name, result).await
            }
        });

        let results = match tokio::time::timeout(self.overall_deadline, join_all(calls)).await {
            Ok(results) => results,
            Err(_) => {
                return Outcome::Reply(Envelope::error(
                    "timeout",
                    "parallel branches exceeded overall deadline",
                ))
            }
        };

        let payload = match serde_json::to_vec(&results) {
            Ok(bytes) => bytes,
            Err(e) => return Outcome::Reply(Envelope::error("internal_agent_error", e.to_string())),
        };

        let aggregate_envelope = Envelope::new(Bytes::from(payload)).with_header(outgoing.header.clone());
        let destination = Address::for_name(self.aggregator.clone());
        match ctx
            .runtime
            .channel(&destination, aggregate_envelope, ChannelOptions::unary(branch_timeout))
            .await
        {
            Ok(Reply::Unary(reply)) => Outcome::Reply(reply),
            Ok(Reply::Stream(_)) => {
                Outcome::Reply(Envelope::error("bad_envelope", "aggregator replied with a stream"))
            }
            Err(e) => Outcome::Reply(Envelope::error(e.kind_str(), e.to_string())),
        }
    }
}

async fn branch_result(
    name: String,
    result: crate::error::Result<Reply>,
) -> BranchResult {
    match result {
        Ok(Reply::Unary(reply)) if reply.is_error() => BranchResult {
            name,
            payload: None,
            error: reply.header.error_kind().map(ToString::to_string),
        },
        Ok(Reply::Unary(reply)) => BranchResult {
            name,
            payload: Some(BASE64.encode(&reply.payload)),
            error: None,
        },
        Ok(Reply::Stream(mut stream)) => {
            let mut last = None;
            loop {
                match stream.next().await {
                    Ok(Some(chunk)) => {
                        let terminal = chunk.header.is_terminal();
                        last = Some(chunk);
                        if terminal {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            match last {
                Some(chunk) if chunk.is_error() => BranchResult {
                    name,
                    payload: None,
                    error: chunk.header.error_kind().map(ToString::to_string),
                },
                Some(chunk) => BranchResult {
                    name,
                    payload: Some(BASE64.encode(&chunk.payload)),
                    error: None,
                },
                None => BranchResult {
                    name,
                    payload: None,
                    error: Some("channel_closed".to_string()),
                },
            }
        }
        Err(e) => BranchResult {
            name,
            payload: None,
            error: Some(e.kind_str().to_string()),
        },
    }
}
