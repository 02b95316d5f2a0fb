//! Sequential pipeline: `[a1, …, an]`, each reply becomes the next
//! step's input, the last reply is returned (`spec.md` §4.6).

use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

use super::{forward, relay_stream};
use crate::address::Address;
use crate::agent::{Agent, AgentContext, Outcome};
use crate::channel::Reply;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::transport::ChannelOptions;

#[derive(Clone)]
pub struct Sequential {
    steps: Vec<String>,
    request_timeout: Duration,
}

impl Sequential {
    #[must_use]
    pub fn new(steps: Vec<String>) -> Self {
        Self {
            steps,
            request_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl Agent for Sequential {
    #[instrument(skip_all, fields(steps = ?self.steps))]
    async fn receive(&mut self, envelope: Envelope, ctx: &AgentContext) -> Outcome {
        let streaming = envelope.header.is_stream();
        let last_index = self.steps.len().saturating_sub(1);
        let mut current = envelope;

        for (i, step) in self.steps.iter().enumerate() {
            let destination = Address::for_name(step.clone());
            let outgoing = forward(&current);

            // Only the final step's stream is forwarded to the caller;
            // every intermediate step collapses its reply (streamed or
            // not) to a single envelope before becoming the next step's
            // input (`spec.md` §4.6).
            if streaming && i == last_index {
                let opts = ChannelOptions::streaming(self.request_timeout);
                return match ctx.runtime.channel(&destination, outgoing, opts).await {
                    Ok(Reply::Stream(stream)) => Outcome::Stream(relay_stream(stream)),
                    Ok(Reply::Unary(reply)) => Outcome::Reply(reply),
                    Err(e) => error_reply(step, &e),
                };
            }

            let opts = ChannelOptions::unary(self.request_timeout);
            let reply = match ctx.runtime.channel(&destination, outgoing, opts).await {
                Ok(Reply::Unary(reply)) => reply,
                Ok(Reply::Stream(mut stream)) => {
                    let mut last = None;
                    loop {
                        match stream.next().await {
                            Ok(Some(chunk)) => {
                                let terminal = chunk.header.is_terminal();
                                last = Some(chunk);
                                if terminal {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => return error_reply(step, &e),
                        }
                    }
                    match last {
                        Some(chunk) => chunk,
                        None => return error_reply(step, &Error::ChannelClosed),
                    }
                }
                Err(e) => return error_reply(step, &e),
            };

            if reply.is_error() {
                return Outcome::Reply(reply);
            }
            current = reply;
        }

        Outcome::Reply(current)
    }
}

fn error_reply(step: &str, e: &Error) -> Outcome {
    Outcome::Reply(Envelope::error(e.kind_str(), format!("step {step}: {e}")))
}
