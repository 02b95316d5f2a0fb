//! The per-instance driver task: owns one `Box<dyn Agent>`, reads its
//! inbox serially, and turns each `Outcome` into transport traffic
//! (`spec.md` §4.4, §5).

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::agent::{Agent, AgentContext, Outcome};
use crate::channel::ChannelReader;
use crate::envelope::Envelope;
use crate::transport::Transport;

/// Shared liveness bookkeeping the reaper reads without going through
/// the instance's own driver task.
pub(crate) struct Liveness {
    pub(crate) busy: AtomicBool,
    pub(crate) last_active_millis: AtomicU64,
}

impl Liveness {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            busy: AtomicBool::new(false),
            last_active_millis: AtomicU64::new(now_millis()),
        })
    }

    pub(crate) fn touch(&self) {
        self.last_active_millis.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn is_idle_for(&self, millis: u64) -> bool {
        if self.busy.load(Ordering::Relaxed) {
            return false;
        }
        now_millis().saturating_sub(self.last_active_millis.load(Ordering::Relaxed)) >= millis
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Drives one instance until it receives a stop envelope (`terminate=1`)
/// or its inbox closes. Runs entirely on one task, so `receive` is never
/// re-entered (`spec.md` §8 "Per-instance serialisation").
#[instrument(skip_all, fields(address = %ctx.address))]
pub(crate) async fn run(
    mut agent: Box<dyn Agent>,
    ctx: AgentContext,
    mut inbox: ChannelReader,
    transport: Arc<dyn Transport>,
    liveness: Arc<Liveness>,
) {
    agent.started(&ctx).await;

    while let Some(envelope) = inbox.recv().await {
        if envelope.header.is_terminal() {
            debug!("stop envelope received, deactivating");
            break;
        }

        liveness.busy.store(true, Ordering::Relaxed);
        liveness.touch();

        let reply_to = envelope.header.reply_to().map(ToString::to_string);
        let outcome = AssertUnwindSafe(agent.receive(envelope, &ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(outcome) => handle_outcome(outcome, reply_to.as_deref(), &transport, &ctx.address).await,
            Err(panic) => {
                let detail = panic_message(&panic);
                warn!(error = %detail, "agent hook panicked, instance remains alive");
                if let Some(reply_to) = reply_to.as_deref() {
                    publish_error(&transport, reply_to, "internal_agent_error", detail).await;
                }
            }
        }

        liveness.touch();
        liveness.busy.store(false, Ordering::Relaxed);
    }

    agent.stopped(&ctx).await;
}

async fn handle_outcome(
    outcome: Outcome,
    reply_to: Option<&str>,
    transport: &Arc<dyn Transport>,
    self_address: &Address,
) {
    match outcome {
        Outcome::None => {}
        Outcome::Reply(envelope) => {
            let Some(reply_to) = reply_to else {
                debug!("reply produced with no reply_to, dropping");
                return;
            };
            publish(transport, reply_to, envelope, self_address).await;
        }
        Outcome::Stream(mut reader) => {
            let Some(reply_to) = reply_to else {
                debug!("stream produced with no reply_to, draining and dropping");
                while reader.recv().await.is_some() {}
                return;
            };
            let mut saw_terminal = false;
            while let Some(envelope) = reader.recv().await {
                saw_terminal = envelope.header.is_terminal();
                publish(transport, reply_to, envelope, self_address).await;
                if saw_terminal {
                    break;
                }
            }
            if !saw_terminal {
                // The producer's stream ended without a terminating
                // chunk; synthesize one so callers never hang
                // (`spec.md` §8 "Stream termination").
                let mut closer = Envelope::default();
                closer.header.set_terminate();
                publish(transport, reply_to, closer, self_address).await;
            }
        }
    }
}

async fn publish(transport: &Arc<dyn Transport>, reply_to: &str, envelope: Envelope, from: &Address) {
    let Ok(address) = reply_to.parse::<Address>() else {
        warn!(reply_to, "malformed reply_to header, dropping reply");
        return;
    };
    if let Err(e) = transport.publish(envelope, &address, false).await {
        debug!(from = %from, to = %address, error = %e, "reply publish failed, caller likely gone");
    }
}

async fn publish_error(transport: &Arc<dyn Transport>, reply_to: &str, kind: &str, detail: String) {
    if let Ok(address) = reply_to.parse::<Address>() {
        let _ = transport.publish(Envelope::error(kind, detail), &address, false).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "agent hook panicked".to_string()
    }
}
