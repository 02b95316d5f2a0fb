//! Scenario 1 from the runtime specification: a registered agent that
//! echoes its payload verbatim, reached through a unary `channel` call
//! on the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Outcome, Reply, Runtime,
    RuntimeConfig,
};
use async_trait::async_trait;
use bytes::Bytes;

struct Echo;

#[async_trait]
impl Agent for Echo {
    async fn receive(&mut self, envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        Outcome::Reply(Envelope::new(envelope.payload))
    }
}

#[test_log::test(tokio::test)]
async fn local_echo_returns_payload_verbatim() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime
        .register(AgentSpec::new("echo", || Box::new(Echo) as Box<dyn Agent>))
        .await
        .unwrap();

    let envelope = Envelope::new(Bytes::from_static(b"hi"));
    let opts = ChannelOptions::unary(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("echo"), envelope, opts)
        .await
        .unwrap();

    match reply {
        Reply::Unary(env) => assert_eq!(env.payload, Bytes::from_static(b"hi")),
        Reply::Stream(_) => panic!("expected a unary reply"),
    }
}
