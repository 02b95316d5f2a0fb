//! Testable property: every streaming reply sequence ends with exactly
//! one envelope bearing `terminate=1`.

use std::sync::Arc;
use std::time::Duration;

use agentcore::transport::inproc::InProcessTransport;
use agentcore::{
    Address, Agent, AgentContext, AgentSpec, ChannelOptions, Envelope, Outcome, Reply, Runtime,
    RuntimeConfig,
};
use async_trait::async_trait;
use bytes::Bytes;

struct Streamer(u32);

#[async_trait]
impl Agent for Streamer {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        let (writer, reader) = agentcore::channel::channel(4);
        let n = self.0;
        tokio::spawn(async move {
            for i in 0..n {
                let mut chunk = Envelope::new(Bytes::from(i.to_string()));
                if i == n - 1 {
                    chunk.header.set_terminate();
                }
                if writer.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Outcome::Stream(reader)
    }
}

#[test_log::test(tokio::test)]
async fn stream_ends_with_exactly_one_terminating_chunk() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime
        .register(AgentSpec::new("streamer", || {
            Box::new(Streamer(3)) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = ChannelOptions::streaming(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("streamer"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap();

    let mut stream = match reply {
        Reply::Stream(stream) => stream,
        Reply::Unary(_) => panic!("expected a streaming reply"),
    };

    let mut chunks = Vec::new();
    let mut terminal_count = 0;
    while let Some(chunk) = stream.next().await.unwrap() {
        if chunk.header.is_terminal() {
            terminal_count += 1;
        }
        chunks.push(String::from_utf8(chunk.payload.to_vec()).unwrap());
    }

    assert_eq!(chunks, vec!["0".to_string(), "1".to_string(), "2".to_string()]);
    assert_eq!(terminal_count, 1, "exactly one chunk must bear terminate=1");
    assert!(stream.next().await.unwrap().is_none(), "stream must end, not hang");
}

struct NeverTerminates;

#[async_trait]
impl Agent for NeverTerminates {
    async fn receive(&mut self, _envelope: Envelope, _ctx: &AgentContext) -> Outcome {
        let (writer, reader) = agentcore::channel::channel(4);
        tokio::spawn(async move {
            let _ = writer.send(Envelope::new(Bytes::from_static(b"only"))).await;
            // Producer ends its stream without ever setting terminate=1.
        });
        Outcome::Stream(reader)
    }
}

#[test_log::test(tokio::test)]
async fn driver_synthesizes_a_terminator_if_producer_forgets_one() {
    let transport = Arc::new(InProcessTransport::new());
    let runtime = Runtime::new(transport, RuntimeConfig::new());

    runtime
        .register(AgentSpec::new("forgetful", || {
            Box::new(NeverTerminates) as Box<dyn Agent>
        }))
        .await
        .unwrap();

    let opts = ChannelOptions::streaming(Duration::from_secs(2));
    let reply = runtime
        .channel(&Address::for_name("forgetful"), Envelope::new(Bytes::new()), opts)
        .await
        .unwrap();

    let mut stream = match reply {
        Reply::Stream(stream) => stream,
        Reply::Unary(_) => panic!("expected a streaming reply"),
    };

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.payload, Bytes::from_static(b"only"));
    assert!(!first.header.is_terminal());

    let second = stream.next().await.unwrap().unwrap();
    assert!(second.header.is_terminal(), "the driver must synthesize a closing chunk");
}
