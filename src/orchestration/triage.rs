//! Dynamic triage/handoff: a chat-like agent that discovers candidate
//! agents under a namespace, offers them to a model as callable tools,
//! and hands the session off to whichever one the model selects,
//! forwarding further turns there until a handoff-back or a new
//! handoff occurs (`spec.md` §4.6).
//!
//! The model client itself is out of scope for this crate (`spec.md`
//! §1); [`ToolInvoker`] is the seam a consumer plugs a real one into.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{instrument, warn};

use super::forward;
use crate::address::Address;
use crate::agent::{Agent, AgentContext, Outcome};
use crate::channel::Reply;
use crate::discovery;
use crate::envelope::{Envelope, HDR_TYPE};
use crate::error::Error;
use crate::transport::ChannelOptions;

/// Header value marking an envelope as a handoff instruction: either the
/// triage agent handing a session to a candidate tool, or a candidate
/// handing it back. Carried in `header["type"]`; distinguished from
/// ordinary conversation turns only by this marker since the payload
/// format of a handoff is otherwise agent-defined.
pub const HANDOFF_TYPE: &str = "handoff_back";

/// What a model decided to do with the current turn.
pub enum ToolDecision {
    /// Reply directly; no handoff.
    Reply(Envelope),
    /// Hand the session to this candidate agent name.
    HandoffTo(String),
}

/// The seam between the triage agent and whatever LLM client a consumer
/// wraps it with. `conversation` is the turn history accumulated so far
/// this session; `candidates` is the namespace's discovered agent names.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn decide(&self, conversation: &[Envelope], candidates: &[String]) -> ToolDecision;
}

/// A deterministic stand-in used by this crate's own tests. Either
/// always replies by echoing the latest turn, or always hands off to a
/// fixed candidate — real deployments supply a model-backed
/// `ToolInvoker` instead.
pub struct ScriptedInvoker {
    handoff_target: Option<String>,
}

impl ScriptedInvoker {
    #[must_use]
    pub fn always_reply() -> Self {
        Self { handoff_target: None }
    }

    #[must_use]
    pub fn handoff_to(name: impl Into<String>) -> Self {
        Self {
            handoff_target: Some(name.into()),
        }
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn decide(&self, conversation: &[Envelope], _candidates: &[String]) -> ToolDecision {
        match &self.handoff_target {
            Some(name) => ToolDecision::HandoffTo(name.clone()),
            None => {
                let payload = conversation.last().map(|e| e.payload.clone()).unwrap_or_default();
                ToolDecision::Reply(Envelope::new(payload))
            }
        }
    }
}

pub struct Dynamic {
    namespace: String,
    invoker: std::sync::Arc<dyn ToolInvoker>,
    max_handoffs: usize,
    discovery_timeout: Duration,
    discovery_max_replies: usize,
    request_timeout: Duration,

    candidates: Vec<String>,
    current_handoff: Option<String>,
    handoff_count: usize,
    history: Vec<Envelope>,
}

impl Dynamic {
    #[must_use]
    pub fn new(namespace: impl Into<String>, invoker: std::sync::Arc<dyn ToolInvoker>) -> Self {
        Self {
            namespace: namespace.into(),
            invoker,
            max_handoffs: 8,
            discovery_timeout: Duration::from_millis(500),
            discovery_max_replies: 64,
            request_timeout: Duration::from_secs(30),
            candidates: Vec::new(),
            current_handoff: None,
            handoff_count: 0,
            history: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_max_handoffs(mut self, max: usize) -> Self {
        self.max_handoffs = max;
        self
    }

    #[must_use]
    pub fn with_discovery_budget(mut self, timeout: Duration, max_replies: usize) -> Self {
        self.discovery_timeout = timeout;
        self.discovery_max_replies = max_replies;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn call(&self, destination: &str, envelope: Envelope, ctx: &AgentContext) -> Outcome {
        let address = Address::for_name(destination.to_string());
        let opts = ChannelOptions::unary(self.request_timeout);
        match ctx.runtime.channel(&address, envelope, opts).await {
            Ok(Reply::Unary(reply)) => Outcome::Reply(reply),
            Ok(Reply::Stream(mut stream)) => {
                let mut last = None;
                while let Ok(Some(chunk)) = stream.next().await {
                    let terminal = chunk.header.is_terminal();
                    last = Some(chunk);
                    if terminal {
                        break;
                    }
                }
                Outcome::Reply(last.unwrap_or_else(|| Envelope::error("channel_closed", "no reply")))
            }
            Err(e) => Outcome::Reply(error_reply(&e)),
        }
    }
}

fn error_reply(e: &Error) -> Envelope {
    Envelope::error(e.kind_str(), e.to_string())
}

#[async_trait]
impl Agent for Dynamic {
    #[instrument(skip_all, fields(namespace = %self.namespace))]
    async fn started(&mut self, ctx: &AgentContext) {
        match discovery::query_discovery(
            &ctx.runtime,
            &self.namespace,
            self.discovery_timeout,
            self.discovery_max_replies,
        )
        .await
        {
            Ok(names) => self.candidates = names,
            Err(e) => warn!(error = %e, "triage discovery query failed, starting with no candidates"),
        }
    }

    #[instrument(skip_all, fields(namespace = %self.namespace, handoffs = self.handoff_count))]
    async fn receive(&mut self, envelope: Envelope, ctx: &AgentContext) -> Outcome {
        if envelope.header.get(HDR_TYPE) == Some(HANDOFF_TYPE) {
            self.current_handoff = None;
        }

        self.history.push(envelope.clone());

        if let Some(candidate) = self.current_handoff.clone() {
            let outgoing = forward(&envelope);
            return self.call(&candidate, outgoing, ctx).await;
        }

        match self.invoker.decide(&self.history, &self.candidates).await {
            ToolDecision::Reply(reply) => Outcome::Reply(reply),
            ToolDecision::HandoffTo(candidate) => {
                if self.handoff_count >= self.max_handoffs {
                    return Outcome::Reply(Envelope::error(
                        "handoff_limit_exceeded",
                        format!("exceeded {} handoffs this session", self.max_handoffs),
                    ));
                }
                if !self.candidates.iter().any(|c| c == &candidate) {
                    return Outcome::Reply(Envelope::error(
                        "bad_envelope",
                        format!("{candidate} is not a discovered candidate"),
                    ));
                }
                self.handoff_count += 1;
                self.current_handoff = Some(candidate.clone());
                let outgoing = forward(&envelope);
                self.call(&candidate, outgoing, ctx).await
            }
        }
    }
}
