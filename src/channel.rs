//! A channel is a mailbox with two ends: a writer that never blocks
//! indefinitely on a healthy receiver, and a reader that yields envelopes
//! in FIFO order. Used both for an agent's inbox and for the caller-side
//! reply stream of a request (`spec.md` §4.1).

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::envelope::Envelope;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ChannelWriter {
    sender: mpsc::Sender<Envelope>,
}

impl ChannelWriter {
    /// Waits for room in a bounded inbox; this is the backpressure point
    /// `spec.md` §5 describes.
    ///
    /// # Errors
    /// Returns `Error::ChannelClosed` if the reader end has been dropped.
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.sender
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// # Errors
    /// Returns `Error::ChannelClosed` if the reader end has been dropped
    /// or the inbox is currently full.
    pub fn try_send(&self, envelope: Envelope) -> Result<()> {
        self.sender
            .try_send(envelope)
            .map_err(|_| Error::ChannelClosed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct ChannelReader {
    receiver: mpsc::Receiver<Envelope>,
}

impl ChannelReader {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Creates a bounded channel. `capacity` mirrors the teacher's per-actor
/// mailbox sizing convention: small numbers serialize work harder, large
/// numbers risk leaving unfinished work behind if the runtime stops.
#[must_use]
pub fn channel(capacity: usize) -> (ChannelWriter, ChannelReader) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelWriter { sender }, ChannelReader { receiver })
}

/// The result of a `Transport::channel` / `Runtime::channel` call: either
/// the single reply of a unary request, or a lazy reader the caller pulls
/// chunks from until one bears `terminate=1` or the channel closes.
#[derive(Debug)]
pub enum Reply {
    Unary(Envelope),
    Stream(StreamReply),
}

/// A streaming reply reader with a deadline that applies only to the
/// first chunk — once the callee has started responding, later chunks
/// are not individually time-bounded (`spec.md` §5: "Cancellation &
/// timeouts").
#[derive(Debug)]
pub struct StreamReply {
    reader: ChannelReader,
    first_chunk_deadline: Option<Duration>,
    seen_first: bool,
    done: bool,
}

impl StreamReply {
    #[must_use]
    pub(crate) fn new(reader: ChannelReader, first_chunk_deadline: Option<Duration>) -> Self {
        Self {
            reader,
            first_chunk_deadline,
            seen_first: false,
            done: false,
        }
    }

    /// Returns `Ok(None)` once the stream has ended (`terminate=1` seen
    /// or the channel closed cleanly).
    ///
    /// # Errors
    /// `Error::Timeout` if the first chunk does not arrive within the
    /// configured deadline. `Error::ChannelClosed` if the channel closes
    /// before any terminating chunk arrives.
    pub async fn next(&mut self) -> Result<Option<Envelope>> {
        if self.done {
            return Ok(None);
        }
        let next = if !self.seen_first {
            self.seen_first = true;
            match self.first_chunk_deadline {
                Some(d) => match timeout(d, self.reader.recv()).await {
                    Ok(v) => v,
                    Err(_) => return Err(Error::Timeout(crate::address::Address::default())),
                },
                None => self.reader.recv().await,
            }
        } else {
            self.reader.recv().await
        };

        match next {
            Some(envelope) => {
                if envelope.header.is_terminal() {
                    self.done = true;
                }
                Ok(Some(envelope))
            }
            None => {
                self.done = true;
                Err(Error::ChannelClosed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_reports_closed_after_reader_dropped() {
        let (writer, reader) = channel(4);
        drop(reader);
        let err = writer.send(Envelope::new(Bytes::new())).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let (writer, mut reader) = channel(4);
        for i in 0..3u8 {
            writer
                .send(Envelope::new(bytes::Bytes::copy_from_slice(&[i])))
                .await
                .unwrap();
        }
        for i in 0..3u8 {
            let env = reader.recv().await.unwrap();
            assert_eq!(env.payload.as_ref(), &[i]);
        }
    }

    use bytes::Bytes;

    #[tokio::test]
    async fn stream_reply_ends_on_terminate() {
        let (writer, reader) = channel(4);
        writer.send(Envelope::new(Bytes::from_static(b"1"))).await.unwrap();
        let mut term = Envelope::new(Bytes::from_static(b"2"));
        term.header.set_terminate();
        writer.send(term).await.unwrap();

        let mut stream = StreamReply::new(reader, None);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"1"));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"2"));
        assert!(stream.next().await.unwrap().is_none());
    }
}
