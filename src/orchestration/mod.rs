//! Orchestration agents: agents that treat other agents as composable
//! units by calling back into the runtime through `channel` (`spec.md`
//! §4.6).

pub mod parallel;
pub mod sequential;
pub mod triage;

pub use parallel::Parallel;
pub use sequential::Sequential;
pub use triage::{Dynamic, ToolInvoker};

use crate::channel::{ChannelReader, StreamReply};
use crate::envelope::{Envelope, Header, HDR_REPLY_TO, HDR_STREAM, HDR_TERMINATE};

/// Copies a reply envelope's header, stripping the transport-managed
/// keys (`reply_to`, `stream`, `terminate`) before it becomes the input
/// to the next hop. `type` and `session_id` (and any agent-defined keys)
/// pass through unchanged.
fn forwardable_header(header: &Header) -> Header {
    let mut out = Header::new();
    for (k, v) in header.iter() {
        if k == HDR_REPLY_TO || k == HDR_STREAM || k == HDR_TERMINATE {
            continue;
        }
        out.set(k.clone(), v.clone());
    }
    out
}

fn forward(envelope: &Envelope) -> Envelope {
    Envelope::new(envelope.payload.clone()).with_header(forwardable_header(&envelope.header))
}

/// Relays chunks from a `StreamReply` (the caller-side view of a
/// request/reply call) into a fresh mailbox whose reader half is handed
/// back out as an `Outcome::Stream`. This is what lets an orchestration
/// agent forward a branch's stream to its own caller instead of
/// collapsing it, without exposing the branch's reply channel directly.
fn relay_stream(mut stream: StreamReply) -> ChannelReader {
    let (writer, reader) = crate::channel::channel(16);
    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Ok(Some(chunk)) => {
                    let terminal = chunk.header.is_terminal();
                    if writer.send(chunk).await.is_err() || terminal {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = writer.send(Envelope::error(e.kind_str(), e.to_string())).await;
                    break;
                }
            }
        }
    });
    reader
}
