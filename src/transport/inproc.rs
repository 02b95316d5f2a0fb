//! In-process binding: a single shared map from address patterns to
//! subscription handlers. Reply channels are in-memory channels keyed by
//! a process-unique identifier (`spec.md` §4.2).

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{instrument, trace};
use uuid::Uuid;

use crate::address::Address;
use crate::channel::{self, ChannelReader, ChannelWriter};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::transport::{Handler, SubscribeMode, SubscriptionHandle, Transport};

struct Subscription {
    id: Uuid,
    mode: SubscribeMode,
    handler: Handler,
}

/// Subscribers registered for one name: broadcast subscribers (e.g.
/// discovery) all receive every envelope; load-balanced subscribers
/// round-robin so multiple runtimes hosting the same agent name share
/// the load, mirroring the broker binding's queue-group semantics.
#[derive(Default)]
struct NameSubscribers {
    entries: Vec<Subscription>,
    rr_counter: AtomicUsize,
}

impl NameSubscribers {
    fn next_balanced(&self) -> Option<&Subscription> {
        let balanced: Vec<&Subscription> = self
            .entries
            .iter()
            .filter(|s| s.mode == SubscribeMode::LoadBalanced)
            .collect();
        if balanced.is_empty() {
            return None;
        }
        let idx = self.rr_counter.fetch_add(1, Ordering::Relaxed) % balanced.len();
        Some(balanced[idx])
    }

    fn broadcast(&self) -> impl Iterator<Item = &Subscription> {
        self.entries
            .iter()
            .filter(|s| s.mode == SubscribeMode::Broadcast)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, cheaply-clonable in-process transport. Every `Runtime` in the
/// same process that is constructed with a clone of the same
/// `InProcessTransport` can address each other's agents directly.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    subscriptions: Arc<DashMap<String, NameSubscribers>>,
    reply_inboxes: Arc<DashMap<String, ChannelWriter>>,
    reply_capacity: usize,
}

impl InProcessTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            reply_inboxes: Arc::new(DashMap::new()),
            reply_capacity: 64,
        }
    }

    #[must_use]
    pub fn with_reply_capacity(mut self, capacity: usize) -> Self {
        self.reply_capacity = capacity;
        self
    }

    fn has_subscriber(&self, name: &str) -> bool {
        self.subscriptions.get(name).is_some_and(|v| !v.is_empty())
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    #[instrument(skip(self, envelope))]
    async fn publish(
        &self,
        envelope: Envelope,
        destination: &Address,
        probe: bool,
    ) -> Result<()> {
        // Reply addresses are delivered directly to their inbox, never
        // treated as a registered agent name.
        if let Some(writer) = self.reply_inboxes.get(&destination.name) {
            if probe {
                return Ok(());
            }
            return writer.send(envelope).await;
        }

        if probe && !self.has_subscriber(&destination.name) {
            return Err(Error::NoAgent(destination.clone()));
        }

        let Some(subs) = self.subscriptions.get(&destination.name) else {
            return Err(Error::NoAgent(destination.clone()));
        };
        if subs.is_empty() {
            return Err(Error::NoAgent(destination.clone()));
        }

        trace!(destination = %destination, "in-proc publish");
        for sub in subs.broadcast() {
            (sub.handler)(envelope.clone()).await;
        }
        if let Some(sub) = subs.next_balanced() {
            (sub.handler)(envelope).await;
        }
        Ok(())
    }

    #[instrument(skip(self, handler))]
    async fn subscribe(
        &self,
        pattern: &Address,
        mode: SubscribeMode,
        handler: Handler,
    ) -> Result<SubscriptionHandle> {
        let id = Uuid::new_v4();
        self.subscriptions
            .entry(pattern.name.clone())
            .or_default()
            .entries
            .push(Subscription { id, mode, handler });
        Ok(SubscriptionHandle {
            id,
            name: pattern.name.clone(),
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        if let Some(mut subs) = self.subscriptions.get_mut(&handle.name) {
            subs.entries.retain(|s| s.id != handle.id);
        }
        Ok(())
    }

    async fn open_reply_channel(&self) -> Result<(Address, ChannelReader)> {
        let (writer, reader) = channel::channel(self.reply_capacity);
        let address = Address::for_name(format!("_reply_{}", Uuid::new_v4()));
        self.reply_inboxes.insert(address.name.clone(), writer);
        Ok((address, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn publish_without_subscriber_is_no_agent() {
        let t = InProcessTransport::new();
        let err = t
            .publish(Envelope::new(Bytes::new()), &Address::for_name("nope"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAgent(_)));
    }

    #[tokio::test]
    async fn probe_fails_fast_without_delivering() {
        let t = InProcessTransport::new();
        let err = t
            .publish(Envelope::new(Bytes::new()), &Address::for_name("nope"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAgent(_)));
    }

    #[tokio::test]
    async fn subscribe_then_publish_invokes_handler() {
        let t = InProcessTransport::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        t.subscribe(
            &Address::for_name("echo"),
            SubscribeMode::LoadBalanced,
            Arc::new(move |_env| {
                let calls = calls2.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await
        .unwrap();

        t.publish(Envelope::new(Bytes::new()), &Address::for_name("echo"), false)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reply_channel_round_trips_an_envelope() {
        let t = InProcessTransport::new();
        let (reply_addr, mut reader) = t.open_reply_channel().await.unwrap();
        t.publish(Envelope::new(Bytes::from_static(b"hi")), &reply_addr, false)
            .await
            .unwrap();
        let env = reader.recv().await.unwrap();
        assert_eq!(env.payload, Bytes::from_static(b"hi"));
    }

    /// The real reply path never carries the `Address` struct: a
    /// replying agent's driver only has `header["reply_to"]` as a
    /// string and re-parses it (`runtime/instance.rs`). Exercise that
    /// same string round-trip here rather than handing `publish` the
    /// `Address` directly.
    #[tokio::test]
    async fn reply_channel_round_trips_through_the_reply_to_string() {
        let t = InProcessTransport::new();
        let (reply_addr, mut reader) = t.open_reply_channel().await.unwrap();

        let parsed: Address = reply_addr.to_string().parse().unwrap();
        assert_eq!(parsed, reply_addr, "reply address must survive Display/FromStr");

        t.publish(Envelope::new(Bytes::from_static(b"hi")), &parsed, false)
            .await
            .unwrap();
        let env = reader.recv().await.unwrap();
        assert_eq!(env.payload, Bytes::from_static(b"hi"));
    }
}
