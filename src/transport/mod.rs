//! Transport adapter interface.
//!
//! Engines own a boxed [`Transport`] and treat it as a frame-oriented byte
//! duplex: every successful `read` yields exactly one frame (a serial driver
//! typically delimits frames by inter-byte silence; an in-memory transport by
//! message boundaries). Concrete OS transports are injected by the
//! application; the crate ships [`ChannelTransport`] for in-process peers and
//! tests.

mod channel;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use channel::ChannelTransport;

/// Byte-oriented duplex link carrying one frame per read.
#[async_trait]
pub trait Transport: Send {
    /// Read one frame, waiting at most `timeout`.
    ///
    /// Returns an empty buffer on timeout; errors only on hard failure.
    async fn read(&mut self, timeout: Duration) -> io::Result<Bytes>;

    /// Write one frame.
    async fn write(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Close the link. Subsequent reads and writes fail.
    async fn close(&mut self) -> io::Result<()>;
}
