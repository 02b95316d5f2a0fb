//! Scenario 6: an agent that never replies causes a unary `channel` call
//! to time out; the instance itself is left running, not forcibly
//! terminated by the caller.

use std::sync::Arc;
use std::time::Duration;

use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Error, Outcome, Runtime,
    RuntimeConfig,
};
use async_trait::async_trait;
use bytes::Bytes;

struct Silent;

#[async_trait]
impl Agent for Silent {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        Outcome::None
    }
}

#[test_log::test(tokio::test)]
async fn unary_call_to_silent_agent_times_out() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime
        .register(AgentSpec::new("never", || Box::new(Silent) as Box<dyn Agent>))
        .await
        .unwrap();

    let opts = ChannelOptions::unary(Duration::from_millis(50));
    let err = runtime
        .channel(&Address::for_name("never"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));

    // The instance is not torn down by the caller on timeout: a second
    // probe publish still finds a live subscriber rather than `NoAgent`.
    let probe_opts = ChannelOptions::unary(Duration::from_millis(50)).with_probe(true);
    let second = runtime
        .channel(&Address::for_name("never"), Envelope::new(Bytes::new()), probe_opts)
        .await
        .unwrap_err();
    assert!(matches!(second, Error::Timeout(_)), "agent still registered, just silent");
}
