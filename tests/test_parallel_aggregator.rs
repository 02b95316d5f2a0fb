//! Scenario 3: three branches reply "1", "2", "3"; a `Parallel`
//! orchestration agent fans out concurrently and an aggregator
//! concatenates the sorted results.

use std::sync::Arc;
use std::time::Duration;

use agentcore::orchestration::Parallel;
use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Outcome, Reply, Runtime,
    RuntimeConfig,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;

struct Constant(&'static str);

#[async_trait]
impl Agent for Constant {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        Outcome::Reply(Envelope::new(Bytes::from_static(self.0.as_bytes())))
    }
}

#[derive(Deserialize)]
struct TaggedResult {
    #[allow(dead_code)]
    name: String,
    payload: Option<String>,
    error: Option<String>,
}

struct ConcatAggregator;

#[async_trait]
impl Agent for ConcatAggregator {
    async fn receive(&mut self, envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        let results: Vec<TaggedResult> = serde_json::from_slice(&envelope.payload).unwrap();
        let mut pieces: Vec<String> = results
            .iter()
            .map(|r| {
                assert!(r.error.is_none(), "unexpected branch error");
                let bytes = BASE64.decode(r.payload.as_ref().unwrap()).unwrap();
                String::from_utf8(bytes).unwrap()
            })
            .collect();
        pieces.sort();
        Outcome::Reply(Envelope::new(Bytes::from(pieces.concat())))
    }
}

#[test_log::test(tokio::test)]
async fn parallel_fan_out_concatenates_sorted_replies() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    for (name, value) in [("one", "3"), ("two", "1"), ("three", "2")] {
        runtime
            .register(AgentSpec::new(name, move || {
                Box::new(Constant(value)) as Box<dyn Agent>
            }))
            .await
            .unwrap();
    }

    runtime
        .register(AgentSpec::new("aggregator", || {
            Box::new(ConcatAggregator) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let parallel = Parallel::new(
        vec!["one".to_string(), "two".to_string(), "three".to_string()],
        "aggregator",
    );
    runtime
        .register(AgentSpec::new("fanout", move || {
            Box::new(parallel.clone()) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = ChannelOptions::unary(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("fanout"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap();

    match reply {
        Reply::Unary(env) => assert_eq!(env.payload, Bytes::from_static(b"123")),
        Reply::Stream(_) => panic!("expected a unary reply"),
    }
}
