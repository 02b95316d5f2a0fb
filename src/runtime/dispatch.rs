//! The single task that owns the registry and live table. Every mutation
//! arrives as a [`Command`] over an `mpsc` channel; nothing else touches
//! these maps (`spec.md` §5).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, trace, warn};

use crate::agent::AgentSpec;
use crate::config::RuntimeConfig;
use crate::discovery::DISCOVERY_NAME;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::transport::{SubscribeMode, SubscriptionHandle, Transport};

use super::instance::{self, Liveness};
use super::Runtime;

pub(crate) enum Command {
    Register {
        spec: AgentSpec,
        mode: SubscribeMode,
        done: oneshot::Sender<Result<()>>,
    },
    Deregister {
        name: String,
        done: oneshot::Sender<Result<()>>,
    },
    Incoming {
        name: String,
        envelope: Envelope,
    },
    ListNames {
        prefix: String,
        done: oneshot::Sender<Vec<String>>,
    },
    InstanceStopped {
        name: String,
        key: String,
    },
}

struct RegisteredName {
    spec: AgentSpec,
    subscription: SubscriptionHandle,
}

struct LiveInstance {
    writer: crate::channel::ChannelWriter,
    liveness: Arc<Liveness>,
}

struct Core {
    transport: Arc<dyn Transport>,
    config: Arc<RuntimeConfig>,
    runtime: Runtime,
    registry: HashMap<String, RegisteredName>,
    live: HashMap<(String, String), LiveInstance>,
}

pub(crate) async fn run(
    transport: Arc<dyn Transport>,
    config: Arc<RuntimeConfig>,
    mut control: mpsc::Receiver<Command>,
    runtime: Runtime,
) {
    let mut core = Core {
        transport,
        config: config.clone(),
        runtime,
        registry: HashMap::new(),
        live: HashMap::new(),
    };
    let mut reap_tick = tokio::time::interval(config.reap_tick());
    reap_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = control.recv() => {
                match command {
                    Some(command) => core.handle(command).await,
                    None => break,
                }
            }
            _ = reap_tick.tick() => {
                core.reap().await;
            }
        }
    }
}

impl Core {
    async fn handle(&mut self, command: Command) {
        match command {
            Command::Register { spec, mode, done } => {
                let result = self.register(spec, mode).await;
                let _ = done.send(result);
            }
            Command::Deregister { name, done } => {
                let result = self.deregister(&name).await;
                let _ = done.send(result);
            }
            Command::Incoming { name, envelope } => {
                self.dispatch(&name, envelope).await;
            }
            Command::ListNames { prefix, done } => {
                let names = self.list_names(&prefix);
                let _ = done.send(names);
            }
            Command::InstanceStopped { name, key } => {
                self.live.remove(&(name, key));
            }
        }
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn register(&mut self, spec: AgentSpec, mode: SubscribeMode) -> Result<()> {
        if let Some(prior) = self.registry.remove(&spec.name) {
            self.shutdown_name(&spec.name, prior).await;
        }

        let name = spec.name.clone();
        let control = self.control_sender();
        let pattern = crate::address::Address::for_name(name.clone());
        let handler_name = name.clone();
        let handler: crate::transport::Handler = Arc::new(move |envelope| {
            let control = control.clone();
            let name = handler_name.clone();
            Box::pin(async move {
                if control.send(Command::Incoming { name, envelope }).await.is_err() {
                    warn!("dispatch task gone, dropping inbound envelope");
                }
            })
        });

        let subscription = self.transport.subscribe(&pattern, mode, handler).await?;
        self.registry.insert(
            name,
            RegisteredName {
                spec,
                subscription,
            },
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deregister(&mut self, name: &str) -> Result<()> {
        if let Some(registered) = self.registry.remove(name) {
            self.shutdown_name(name, registered).await;
        }
        Ok(())
    }

    async fn shutdown_name(&mut self, name: &str, registered: RegisteredName) {
        let _ = self.transport.unsubscribe(&registered.subscription).await;
        let keys: Vec<(String, String)> = self
            .live
            .keys()
            .filter(|(n, _)| n == name)
            .cloned()
            .collect();
        for key in keys {
            if let Some(instance) = self.live.remove(&key) {
                let mut stop = Envelope::default();
                stop.header.set_terminate();
                let _ = instance.writer.send(stop).await;
            }
        }
    }

    fn list_names(&self, prefix: &str) -> Vec<String> {
        self.registry
            .keys()
            .filter(|n| n.as_str() != DISCOVERY_NAME)
            .filter(|n| prefix.is_empty() || n.starts_with(&format!("{prefix}.")))
            .cloned()
            .collect()
    }

    #[instrument(skip(self, envelope), fields(name = %name))]
    async fn dispatch(&mut self, name: &str, envelope: Envelope) {
        let Some(registered) = self.registry.get(name) else {
            warn!("envelope for unregistered name, dropping");
            return;
        };

        let key = match registered.spec.instancing {
            crate::agent::Instancing::Singleton => String::new(),
            crate::agent::Instancing::PerSession => {
                envelope.header.session_id().unwrap_or_default().to_string()
            }
        };
        let table_key = (name.to_string(), key.clone());

        if !self.live.contains_key(&table_key) {
            self.activate(name, &key, registered).await;
        }

        if let Some(instance) = self.live.get(&table_key) {
            let writer = instance.writer.clone();
            tokio::spawn(async move {
                let _ = writer.send(envelope).await;
            });
        }
    }

    async fn activate(&mut self, name: &str, key: &str, registered: &RegisteredName) {
        trace!(name, key, "activating instance");
        let agent = registered.spec.construct();
        let (writer, reader) = crate::channel::channel(registered.spec.inbox_capacity);
        let address = if key.is_empty() {
            crate::address::Address::for_name(name)
        } else {
            crate::address::Address::for_session(name, key)
        };
        let ctx = crate::agent::AgentContext {
            address,
            runtime: self.runtime.clone(),
        };
        let liveness = Liveness::new();
        let transport = self.transport.clone();
        let control = self.control_sender();
        let done_name = name.to_string();
        let done_key = key.to_string();
        let liveness_for_task = liveness.clone();

        tokio::spawn(async move {
            instance::run(agent, ctx, reader, transport, liveness_for_task).await;
            let _ = control
                .send(Command::InstanceStopped {
                    name: done_name,
                    key: done_key,
                })
                .await;
        });

        self.live
            .insert((name.to_string(), key.to_string()), LiveInstance { writer, liveness });
    }

    async fn reap(&mut self) {
        let deadline_millis = u64::try_from(self.config.deactivation_interval.as_millis()).unwrap_or(u64::MAX);
        let idle: Vec<(String, String)> = self
            .live
            .iter()
            .filter(|(_, instance)| instance.liveness.is_idle_for(deadline_millis))
            .map(|(key, _)| key.clone())
            .collect();

        for key in idle {
            if let Some(instance) = self.live.get(&key) {
                trace!(name = %key.0, id = %key.1, "reaping idle instance");
                let mut stop = Envelope::default();
                stop.header.set_terminate();
                if instance.writer.send(stop).await.is_err() {
                    self.live.remove(&key);
                }
            }
        }
    }

    fn control_sender(&self) -> mpsc::Sender<Command> {
        self.runtime.control.clone()
    }
}
