//! Transport: the pluggable delivery abstraction. Three bindings exist —
//! [`inproc`], [`http`], and [`broker`] — and must be indistinguishable
//! to an agent: the same envelope, the same FIFO-per-sender/receiver
//! ordering, the same error taxonomy (`spec.md` §4.2).

pub mod broker;
pub mod http;
pub mod inproc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::address::Address;
use crate::channel::{self, Reply, StreamReply};
use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// A subscription callback: invoked once per envelope delivered for the
/// pattern it was registered under.
pub type Handler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Whether a subscription load-balances across every runtime hosting the
/// same agent name (the common case) or is delivered to every
/// subscriber (used by broadcast discovery, `spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    LoadBalanced,
    Broadcast,
}

/// An opaque handle to a live subscription. Dropping it does not
/// unsubscribe; call `unsubscribe` explicitly.
#[derive(Clone)]
pub struct SubscriptionHandle {
    pub(crate) id: Uuid,
    pub(crate) name: String,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Options governing a `channel` request/reply call.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub timeout: Duration,
    pub probe: bool,
    pub stream: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            probe: false,
            stream: false,
        }
    }
}

impl ChannelOptions {
    #[must_use]
    pub fn unary(timeout: Duration) -> Self {
        Self {
            timeout,
            probe: false,
            stream: false,
        }
    }

    #[must_use]
    pub fn streaming(first_chunk_timeout: Duration) -> Self {
        Self {
            timeout: first_chunk_timeout,
            probe: false,
            stream: true,
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `envelope` to `destination`. If `probe` is set, fails
    /// fast with `Error::NoAgent` when no subscriber exists instead of
    /// delivering.
    async fn publish(&self, envelope: Envelope, destination: &Address, probe: bool)
        -> Result<()>;

    /// Registers `handler` to be invoked for every envelope delivered to
    /// `pattern`.
    async fn subscribe(
        &self,
        pattern: &Address,
        mode: SubscribeMode,
        handler: Handler,
    ) -> Result<SubscriptionHandle>;

    /// Removes a previously installed subscription.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;

    /// Opens a fresh reply channel: an address other parties can publish
    /// replies to, and the reader end this caller pulls them from.
    async fn open_reply_channel(&self) -> Result<(Address, channel::ChannelReader)>;

    /// The request/reply primitive. Provided in terms of the three
    /// operations above so every binding gets identical semantics for
    /// free — this is what makes bindings interchangeable
    /// (`spec.md` §8 "Transport equivalence").
    async fn channel(
        &self,
        destination: &Address,
        mut envelope: Envelope,
        opts: ChannelOptions,
    ) -> Result<Reply> {
        let (reply_address, reader) = self.open_reply_channel().await?;
        envelope.header.set(
            crate::envelope::HDR_REPLY_TO,
            reply_address.to_string(),
        );
        if opts.stream {
            envelope.header.set(crate::envelope::HDR_STREAM, "1");
        }
        self.publish(envelope, destination, opts.probe).await?;

        if opts.stream {
            return Ok(Reply::Stream(StreamReply::new(reader, Some(opts.timeout))));
        }

        let mut stream = StreamReply::new(reader, Some(opts.timeout));
        match stream.next().await {
            Ok(Some(env)) => Ok(Reply::Unary(env)),
            Ok(None) => Err(Error::ChannelClosed),
            Err(e) => Err(match e {
                Error::Timeout(_) => Error::Timeout(destination.clone()),
                other => other,
            }),
        }
    }
}
