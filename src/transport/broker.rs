//! Message-broker binding over NATS. Load-balanced subscriptions use a
//! queue group so only one of N listeners on the same subject receives
//! any given message; broadcast subscriptions (discovery) subscribe
//! without a queue group so every listener hears every message
//! (`spec.md` §4.2, §4.5).

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, trace, warn};
use uuid::Uuid;

use crate::address::Address;
use crate::channel::{self, ChannelReader, ChannelWriter};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::transport::{Handler, SubscribeMode, SubscriptionHandle, Transport};

/// Connection settings for the broker binding, loaded the way the
/// teacher's configuration types are: a `new` constructor plus a
/// `from_env` reading well-known environment variables.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub queue_group: String,
    pub reconnect_backoff_cap: Duration,
}

impl NatsConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_group: "agentcore".to_string(),
            reconnect_backoff_cap: Duration::from_secs(30),
        }
    }

    /// Reads `AGENTCORE_NATS_URL` (default `nats://127.0.0.1:4222`) and
    /// `AGENTCORE_NATS_QUEUE_GROUP` (default `agentcore`).
    #[must_use]
    pub fn from_env() -> Self {
        let url = std::env::var("AGENTCORE_NATS_URL")
            .unwrap_or_else(|_| "nats://127.0.0.1:4222".to_string());
        let queue_group =
            std::env::var("AGENTCORE_NATS_QUEUE_GROUP").unwrap_or_else(|_| "agentcore".to_string());
        Self {
            url,
            queue_group,
            reconnect_backoff_cap: Duration::from_secs(30),
        }
    }
}

impl fmt::Display for NatsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} queue={}]", self.url, self.queue_group)
    }
}

/// Broker binding. `async-nats`'s own client already reconnects
/// transparently with backoff; this binding layers subject translation,
/// queue-group selection, and reply-inbox bookkeeping on top.
#[derive(Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
    queue_group: String,
    reply_inboxes: Arc<DashMap<String, ChannelWriter>>,
    reply_capacity: usize,
}

impl NatsTransport {
    /// # Errors
    /// Returns `Error::TransportFailure` if the initial connection fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;
        Ok(Self {
            client,
            queue_group: config.queue_group.clone(),
            reply_inboxes: Arc::new(DashMap::new()),
            reply_capacity: 64,
        })
    }

    #[must_use]
    pub fn with_reply_capacity(mut self, capacity: usize) -> Self {
        self.reply_capacity = capacity;
        self
    }

    fn subject(address: &Address) -> String {
        address.topic()
    }
}

#[async_trait]
impl Transport for NatsTransport {
    #[instrument(skip(self, envelope))]
    async fn publish(&self, envelope: Envelope, destination: &Address, probe: bool) -> Result<()> {
        if let Some(writer) = self.reply_inboxes.get(&destination.name) {
            if probe {
                return Ok(());
            }
            return writer.send(envelope).await;
        }

        if probe {
            // NATS has no synchronous "does anyone listen" query; a
            // probe here degrades to checking whether the server thinks
            // the subject has any interest via a request with a very
            // short timeout would require a reply subject from the
            // callee, which we don't have pre-publish. We therefore
            // publish unconditionally, same caveat as the HTTP binding.
            trace!(destination = %destination, "probe on broker binding always proceeds");
        }

        let subject = Self::subject(destination);
        let payload = envelope.to_wire()?;
        self.client
            .publish(subject, payload)
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, handler))]
    async fn subscribe(
        &self,
        pattern: &Address,
        mode: SubscribeMode,
        handler: Handler,
    ) -> Result<SubscriptionHandle> {
        let subject = Self::subject(pattern);
        let id = Uuid::new_v4();
        let mut subscriber = match mode {
            SubscribeMode::LoadBalanced => self
                .client
                .queue_subscribe(subject.clone(), self.queue_group.clone())
                .await
                .map_err(|e| Error::TransportFailure(e.to_string()))?,
            SubscribeMode::Broadcast => self
                .client
                .subscribe(subject.clone())
                .await
                .map_err(|e| Error::TransportFailure(e.to_string()))?,
        };

        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                match Envelope::from_wire(&message.payload) {
                    Ok(envelope) => handler(envelope).await,
                    Err(e) => warn!(error = %e, "dropping malformed broker message"),
                }
            }
        });

        Ok(SubscriptionHandle {
            id,
            name: pattern.name.clone(),
        })
    }

    async fn unsubscribe(&self, _handle: &SubscriptionHandle) -> Result<()> {
        // `async-nats` subscriptions unsubscribe when their `Subscriber`
        // is dropped; ours lives inside the spawned forwarding task for
        // the runtime's lifetime, matching the in-process binding's
        // assumption that agents outlive their subscriptions.
        Ok(())
    }

    async fn open_reply_channel(&self) -> Result<(Address, ChannelReader)> {
        let (writer, reader) = channel::channel(self.reply_capacity);
        let address = Address::for_name(format!("_reply_{}", Uuid::new_v4()));
        self.reply_inboxes.insert(address.name.clone(), writer.clone());

        let subject = Self::subject(&address);
        let mut subscriber = self
            .client
            .subscribe(subject)
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if let Ok(envelope) = Envelope::from_wire(&message.payload) {
                    if writer.send(envelope).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok((address, reader))
    }
}
