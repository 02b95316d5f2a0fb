//! Testable property: re-registering a name replaces it cleanly and
//! terminates prior instances; deregistering an unknown name is a
//! no-op.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Error, Outcome, Reply,
    Runtime, RuntimeConfig,
};
use async_trait::async_trait;
use bytes::Bytes;

struct Tagged(&'static str, Arc<AtomicU32>);

#[async_trait]
impl Agent for Tagged {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        Outcome::Reply(Envelope::new(Bytes::from_static(self.0.as_bytes())))
    }

    async fn stopped(&mut self, _ctx: &AgentContext) {
        self.1.fetch_add(1, Ordering::SeqCst);
    }
}

#[test_log::test(tokio::test)]
async fn reregistering_a_name_replaces_it_and_stops_prior_instances() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());
    let stops = Arc::new(AtomicU32::new(0));

    let stops_v1 = stops.clone();
    runtime
        .register(AgentSpec::new("svc", move || {
            Box::new(Tagged("v1", stops_v1.clone())) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = || ChannelOptions::unary(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("svc"), Envelope::new(Bytes::new()), opts())
        .await
        .unwrap();
    assert_eq!(unary_payload(reply), Bytes::from_static(b"v1"));

    let stops_v2 = stops.clone();
    runtime
        .register(AgentSpec::new("svc", move || {
            Box::new(Tagged("v2", stops_v2.clone())) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    // Give the prior instance's driver task a moment to process its
    // stop envelope and run `stopped`.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stops.load(Ordering::SeqCst), 1, "prior instance must have been stopped");

    let reply = runtime
        .channel(&Address::for_name("svc"), Envelope::new(Bytes::new()), opts())
        .await
        .unwrap();
    assert_eq!(unary_payload(reply), Bytes::from_static(b"v2"));
}

#[test_log::test(tokio::test)]
async fn deregistering_an_unknown_name_is_a_no_op() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime.deregister("never-registered").await.unwrap();
    runtime.deregister("never-registered").await.unwrap();

    let err = runtime
        .channel(
            &Address::for_name("never-registered"),
            Envelope::new(Bytes::new()),
            ChannelOptions::unary(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAgent(_)));
}

fn unary_payload(reply: Reply) -> Bytes {
    match reply {
        Reply::Unary(env) => env.payload,
        Reply::Stream(_) => panic!("expected a unary reply"),
    }
}
