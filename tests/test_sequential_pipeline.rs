//! Scenario 2: three agents each append one letter; a `Sequential`
//! orchestration agent chains them, returning the final reply.

use std::sync::Arc;
use std::time::Duration;

use agentcore::orchestration::Sequential;
use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Outcome, Reply, Runtime,
    RuntimeConfig,
};
use async_trait::async_trait;
use bytes::Bytes;

struct Appender(u8);

#[async_trait]
impl Agent for Appender {
    async fn receive(&mut self, envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        let mut payload = envelope.payload.to_vec();
        payload.push(self.0);
        Outcome::Reply(Envelope::new(Bytes::from(payload)))
    }
}

#[test_log::test(tokio::test)]
async fn sequential_pipeline_chains_replies_in_order() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    for (name, byte) in [("a", b'A'), ("b", b'B'), ("c", b'C')] {
        runtime
            .register(AgentSpec::new(name, move || {
                Box::new(Appender(byte)) as Box<dyn Agent>
            }))
            .await
            .unwrap();
    }

    let pipeline = Sequential::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    runtime
        .register(AgentSpec::new("pipeline", move || {
            Box::new(pipeline.clone()) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = ChannelOptions::unary(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("pipeline"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap();

    match reply {
        Reply::Unary(env) => assert_eq!(env.payload, Bytes::from_static(b"ABC")),
        Reply::Stream(_) => panic!("expected a unary reply"),
    }
}

struct Streamer(Vec<&'static str>);

#[async_trait]
impl Agent for Streamer {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        let (writer, reader) = agentcore::channel::channel(4);
        let chunks = self.0.clone();
        tokio::spawn(async move {
            let last = chunks.len().saturating_sub(1);
            for (i, chunk) in chunks.into_iter().enumerate() {
                let mut env = Envelope::new(Bytes::from_static(chunk.as_bytes()));
                if i == last {
                    env.header.set_terminate();
                }
                if writer.send(env).await.is_err() {
                    break;
                }
            }
        });
        Outcome::Stream(reader)
    }
}

/// `spec.md` §4.6: "Streaming mode: only the final step's stream is
/// forwarded to the caller; intermediate steps are consumed to
/// completion (unary collapse)."
#[test_log::test(tokio::test)]
async fn sequential_pipeline_forwards_only_the_final_steps_stream() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime
        .register(AgentSpec::new("a", || {
            Box::new(Appender(b'A')) as Box<dyn Agent>
        }))
        .await
        .unwrap();
    runtime
        .register(AgentSpec::new("b", || {
            Box::new(Appender(b'B')) as Box<dyn Agent>
        }))
        .await
        .unwrap();
    runtime
        .register(AgentSpec::new("c", || {
            Box::new(Streamer(vec!["x", "y", "z"])) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let pipeline = Sequential::new(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    runtime
        .register(AgentSpec::new("pipeline", move || {
            Box::new(pipeline.clone()) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = ChannelOptions::streaming(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("pipeline"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap();

    let mut stream = match reply {
        Reply::Stream(stream) => stream,
        Reply::Unary(_) => panic!("expected a streaming reply"),
    };

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await.unwrap() {
        chunks.push(String::from_utf8(chunk.payload.to_vec()).unwrap());
    }
    assert_eq!(chunks, vec!["x".to_string(), "y".to_string(), "z".to_string()]);
}
