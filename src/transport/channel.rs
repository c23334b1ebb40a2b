//! In-memory frame-oriented duplex over tokio channels.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::Transport;

/// Frames buffered per direction before writes block.
const CHANNEL_CAPACITY: usize = 64;

/// In-memory transport half; create both ends with
/// [`ChannelTransport::pair`].
///
/// Each `write` delivers one frame to the peer; each `read` pulls one frame.
/// Used for in-process engine pairs and throughout the test suite.
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelTransport {
    /// Create a connected pair of transports.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                tx: Some(a_tx),
                rx: b_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }

    fn closed_err() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read(&mut self, timeout: Duration) -> io::Result<Bytes> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(Self::closed_err()),
            Err(_elapsed) => Ok(Bytes::new()),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> io::Result<()> {
        let tx = self.tx.as_ref().ok_or_else(Self::closed_err)?;
        tx.send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| Self::closed_err())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}
