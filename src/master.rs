//! Synchronous command engine.
//!
//! [`Master`] drives one command at a time: `send` transmits and then holds
//! the caller on a tight read/match loop until the command's tracker reaches
//! a terminal state. Only one command is ever outstanding, so matching is
//! trivial and no worker task exists.
//!
//! For full-duplex operation (concurrent commands plus inbound dispatch) use
//! [`AsyncEngine`](crate::AsyncEngine).

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::LinkConfig;
use crate::describe::ProtocolDescriber;
use crate::error::{DevlinkError, Result};
use crate::protocol::{is_valid_command_opcode, Frame, BROADCAST_ADDR};
use crate::publish::{EngineEvent, MessagePublisher, NoopPublisher};
use crate::shape::Shape;
use crate::tracker::{AckValue, CmdTracker, TrackerResult};
use crate::transport::Transport;

/// How long a single transport read waits inside the send loop.
pub(crate) const READ_SLICE: Duration = Duration::from_millis(20);

/// Single-threaded command-response engine.
pub struct Master {
    transport: Option<Box<dyn Transport>>,
    config: LinkConfig,
    describer: Option<ProtocolDescriber>,
    publisher: Arc<dyn MessagePublisher>,
}

impl Master {
    /// Create a master over `transport` with the given channel config.
    pub fn new(transport: impl Transport + 'static, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport: Some(Box::new(transport)),
            config,
            describer: None,
            publisher: Arc::new(NoopPublisher),
        })
    }

    /// The channel configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Attach a describer used for tx/rx debug logging.
    pub fn attach_protocol_describer(&mut self, describer: ProtocolDescriber) {
        self.describer = Some(describer);
    }

    /// Replace the event publisher.
    pub fn set_publisher(&mut self, publisher: Arc<dyn MessagePublisher>) {
        self.publisher = publisher;
    }

    /// Swap the transport. Safe here because `&mut self` guarantees no send
    /// is in flight.
    pub fn set_transport(&mut self, transport: impl Transport + 'static) {
        self.transport = Some(Box::new(transport));
    }

    /// Take the transport out of the engine, leaving it unusable until a new
    /// one is set.
    pub fn take_transport(&mut self) -> Option<Box<dyn Transport>> {
        self.transport.take()
    }

    /// Close the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            transport.close().await?;
        }
        Ok(())
    }

    /// Send a command to the channel's default address with default timing.
    pub async fn send(&mut self, msg: &[u8], ack_shape: Shape) -> Result<AckValue> {
        let addr = self.config.address;
        let (timeout, attempts) = (self.config.timeout, self.config.attempts);
        self.run_command(addr, msg, ack_shape, timeout, attempts).await
    }

    /// Send a command to the channel's default address with explicit timing.
    pub async fn send_with(
        &mut self,
        msg: &[u8],
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Result<AckValue> {
        let addr = self.config.address;
        self.run_command(addr, msg, ack_shape, timeout, attempts).await
    }

    /// Send a command to an explicit address; `addr == 0` broadcasts.
    pub async fn send_to(&mut self, addr: u8, msg: &[u8], ack_shape: Shape) -> Result<AckValue> {
        let (timeout, attempts) = (self.config.timeout, self.config.attempts);
        self.send_to_with(addr, msg, ack_shape, timeout, attempts).await
    }

    /// Send a command to an explicit address with explicit timing.
    pub async fn send_to_with(
        &mut self,
        addr: u8,
        msg: &[u8],
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Result<AckValue> {
        if !self.config.is_addressed() {
            return Err(DevlinkError::Config(
                "send_to requires an addressed channel".to_string(),
            ));
        }
        self.run_command(Some(addr), msg, ack_shape, timeout, attempts)
            .await
    }

    async fn run_command(
        &mut self,
        addr: Option<u8>,
        msg: &[u8],
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Result<AckValue> {
        if msg.is_empty() {
            return Err(DevlinkError::Config("empty command message".to_string()));
        }
        if !is_valid_command_opcode(msg[0]) {
            return Err(DevlinkError::Config(format!(
                "invalid command opcode {:#04x}",
                msg[0]
            )));
        }
        let opcode = msg[0];
        let addressed = self.config.is_addressed();
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| DevlinkError::Config("no transport attached".to_string()))?;

        let mut tracker = CmdTracker::new(
            addr,
            Bytes::copy_from_slice(msg),
            ack_shape,
            timeout,
            attempts,
        );

        loop {
            if let Some(wire) = tracker.maybe_transmit(Instant::now()) {
                if let Some(describer) = &self.describer {
                    tracing::debug!(frame = %describer.describe(&wire), "tx");
                }
                transport.write(&wire).await?;
            }

            // Broadcast completes on transmission; skip the read slice.
            if tracker.result().is_none() {
                let rx = transport.read(READ_SLICE).await?;
                if !rx.is_empty() {
                    if let Some(describer) = &self.describer {
                        tracing::debug!(frame = %describer.describe(&rx), "rx");
                    }
                    if let Some(frame) = Frame::parse(&rx, addressed) {
                        tracker.try_match(&frame);
                    }
                }
            }

            match tracker.result() {
                Some(TrackerResult::Acked(value)) => {
                    let value = value.clone();
                    self.publisher.publish(EngineEvent::CommandCompleted {
                        addr,
                        opcode,
                        ok: true,
                    });
                    return Ok(value);
                }
                Some(TrackerResult::Rejected(reason)) => {
                    let reason = *reason;
                    self.publisher.publish(EngineEvent::CommandCompleted {
                        addr,
                        opcode,
                        ok: false,
                    });
                    return Err(DevlinkError::BadCode { opcode, reason });
                }
                None => {}
            }

            if !tracker.is_alive(Instant::now()) {
                break;
            }
        }

        self.publisher.publish(EngineEvent::CommandCompleted {
            addr,
            opcode,
            ok: false,
        });
        Err(DevlinkError::NoAnswer { opcode })
    }

    /// Broadcast address, re-exported next to the API that uses it.
    pub const BROADCAST: u8 = BROADCAST_ADDR;
}
