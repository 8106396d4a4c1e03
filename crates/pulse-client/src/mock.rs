//! Scripted transport for exercising the reconnection state machine
//! without a server.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use pulse_core::encode_frame;

use crate::error::ClientError;
use crate::transport::{ByteStream, StreamTransport};

/// What the next `open` call should produce.
pub enum MockOutcome {
    /// Open fails outright.
    Fail(ClientError),
    /// Open succeeds and yields the scripted chunks; with `hold_open`
    /// the stream then stays pending instead of ending.
    Stream {
        chunks: Vec<Result<Bytes, ClientError>>,
        hold_open: bool,
    },
    /// Open succeeds with a stream fed from a channel.
    Channel(mpsc::UnboundedReceiver<Result<Bytes, ClientError>>),
}

/// Transport that replays scripted outcomes and records every opened
/// URL. When the script runs dry, opens succeed with an empty stream
/// that stays pending.
#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<String>>,
    script: Mutex<VecDeque<MockOutcome>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Script a stream delivering the given `(event, data)` frames in
    /// one chunk.
    pub fn frames(frames: &[(&str, &str)], hold_open: bool) -> MockOutcome {
        let mut chunk = String::new();
        for (event, data) in frames {
            chunk.push_str(&encode_frame(event, data));
        }
        MockOutcome::Stream {
            chunks: vec![Ok(Bytes::from(chunk))],
            hold_open,
        }
    }

    /// Script a stream the test can feed while the subscriber is live.
    pub fn channel() -> (
        mpsc::UnboundedSender<Result<Bytes, ClientError>>,
        MockOutcome,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, MockOutcome::Channel(rx))
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self, url: &str) -> Result<ByteStream, ClientError> {
        self.opened.lock().push(url.to_string());

        match self.script.lock().pop_front() {
            None => Ok(Box::pin(stream::pending::<Result<Bytes, ClientError>>())),
            Some(MockOutcome::Fail(e)) => Err(e),
            Some(MockOutcome::Stream { chunks, hold_open }) => {
                let scripted = stream::iter(chunks);
                if hold_open {
                    Ok(Box::pin(scripted.chain(stream::pending())))
                } else {
                    Ok(Box::pin(scripted))
                }
            }
            Some(MockOutcome::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
        }
    }
}
