//! The runtime: owns the transport, the agent registry, the live
//! instance table, and the idle reaper. A single dispatch task is the
//! only thing that ever mutates the registry or live table (`spec.md`
//! §5); everything else reaches it by sending a [`Command`] over an
//! internal channel.

mod dispatch;
mod instance;

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use crate::address::Address;
use crate::agent::AgentSpec;
use crate::channel::Reply;
use crate::config::RuntimeConfig;
use crate::discovery::{Discovery, DISCOVERY_NAME};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::transport::{ChannelOptions, SubscribeMode, Transport};

use dispatch::Command;

/// A cheap, cloneable handle to a running agent core. Agents hold one of
/// these in their [`crate::agent::AgentContext`] to address peers; they
/// never hold an owning reference to the dispatch task.
#[derive(Clone)]
pub struct Runtime {
    transport: Arc<dyn Transport>,
    control: mpsc::Sender<Command>,
    config: Arc<RuntimeConfig>,
}

impl Runtime {
    /// Starts the dispatch task and registers the built-in `discovery`
    /// agent.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: RuntimeConfig) -> Self {
        let (control, rx) = mpsc::channel(256);
        let config = Arc::new(config);
        let runtime = Self {
            transport: transport.clone(),
            control,
            config: config.clone(),
        };

        tokio::spawn(dispatch::run(transport, config, rx, runtime.clone()));

        // Enqueued synchronously (not via a spawned task) so it is
        // strictly ahead, in the dispatch task's FIFO command queue, of
        // any registration a caller performs after `new` returns —
        // otherwise a query issued immediately after construction could
        // race discovery's own registration.
        let spec = AgentSpec::new(DISCOVERY_NAME, move || {
            Box::new(Discovery::new()) as Box<dyn crate::agent::Agent>
        });
        let (done, done_rx) = oneshot::channel();
        // Discovery must hear every query across every runtime sharing a
        // broker subject, not just one load-balanced peer, so it is
        // registered with broadcast delivery (`spec.md` §4.5).
        if runtime
            .control
            .try_send(Command::Register {
                spec,
                mode: SubscribeMode::Broadcast,
                done,
            })
            .is_err()
        {
            tracing::error!("dispatch task not ready, discovery agent not registered");
        } else {
            tokio::spawn(async move {
                if let Ok(Err(e)) = done_rx.await {
                    tracing::error!(error = %e, "failed to register built-in discovery agent");
                }
            });
        }

        runtime
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    #[must_use]
    pub fn config(&self) -> Arc<RuntimeConfig> {
        self.config.clone()
    }

    /// Registers `spec`. Replacing an existing name shuts down its prior
    /// live instances first (`spec.md` §4.3).
    ///
    /// # Errors
    /// Returns `Error::ChannelClosed` if the dispatch task is gone.
    #[instrument(skip(self, spec), fields(name = %spec.name))]
    pub async fn register(&self, spec: AgentSpec) -> Result<()> {
        self.register_with_mode(spec, SubscribeMode::LoadBalanced).await
    }

    async fn register_with_mode(&self, spec: AgentSpec, mode: SubscribeMode) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Register { spec, mode, done }).await?;
        rx.await.map_err(|_| crate::error::Error::ChannelClosed)?
    }

    /// Deregisters `name`. A no-op if `name` isn't registered
    /// (`spec.md` §8 "Idempotent register/deregister").
    ///
    /// # Errors
    /// Returns `Error::ChannelClosed` if the dispatch task is gone.
    #[instrument(skip(self))]
    pub async fn deregister(&self, name: &str) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Deregister {
            name: name.to_string(),
            done,
        })
        .await?;
        rx.await.map_err(|_| crate::error::Error::ChannelClosed)?
    }

    /// Lists locally registered names under `prefix`, excluding
    /// `discovery` itself (`spec.md` §4.5). This runtime's own registry
    /// only — callers wanting a broker-wide view should use
    /// [`discovery::query_discovery`].
    ///
    /// # Errors
    /// Returns `Error::ChannelClosed` if the dispatch task is gone.
    pub async fn list_names(&self, prefix: &str) -> Result<Vec<String>> {
        let (done, rx) = oneshot::channel();
        self.send(Command::ListNames {
            prefix: prefix.to_string(),
            done,
        })
        .await?;
        rx.await.map_err(|_| crate::error::Error::ChannelClosed)
    }

    /// Convenience request/reply call, delegating directly to the
    /// transport (`spec.md` §4.3).
    ///
    /// # Errors
    /// `Error::NoAgent`, `Error::Timeout`, or `Error::ChannelClosed` per
    /// `Transport::channel`.
    pub async fn channel(
        &self,
        destination: &Address,
        envelope: Envelope,
        opts: ChannelOptions,
    ) -> Result<Reply> {
        self.transport.channel(destination, envelope, opts).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.control
            .send(command)
            .await
            .map_err(|_| crate::error::Error::ChannelClosed)
    }
}
