//! Async command-response engine for framed device protocols.
//!
//! `devlink` speaks a compact byte protocol over any frame-oriented duplex
//! link: a command is an opcode plus payload, optionally prefixed with a
//! device address, and is acknowledged with the same opcode with its high bit
//! set or rejected with a bad-command reply. Unanswered commands are
//! retransmitted on a fixed schedule until an attempt budget runs out.
//!
//! Two engines are provided:
//!
//! - [`Master`] drives the link from a single task: each send owns the
//!   transport until the command reaches a terminal state. Suited to strict
//!   request-response peripherals.
//! - [`AsyncEngine`] runs a background worker that multiplexes any number of
//!   concurrent outbound commands and simultaneously answers inbound commands
//!   via registered handlers, including on the broadcast address. Two
//!   `AsyncEngine`s make a full-duplex peer-to-peer pair.
//!
//! Payloads are described with the [`Shape`] language (`"u8 i16"` and
//! friends), decoded for you before a handler runs or an ACK completes.
//!
//! # Example
//!
//! ```no_run
//! use devlink::{AsyncEngine, HandlerInput, HandlerReply, LinkConfig, Shape};
//! use devlink::transport::ChannelTransport;
//!
//! # async fn demo() -> devlink::Result<()> {
//! let (link, _peer_link) = ChannelTransport::pair();
//! let engine = AsyncEngine::new(link, LinkConfig::addressed(0x55))?;
//!
//! engine.register_incoming(0x31, "u8".parse().unwrap(), false, |input| async move {
//!     let HandlerInput::Fields(values) = input else { unreachable!() };
//!     Ok(HandlerReply::Payload(vec![values[0].as_u64() as u8 + 1]))
//! })?;
//!
//! let ack = engine.send(&[0x10], Shape::Raw).await?;
//! println!("acked: {:?}", ack);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod describe;
pub mod engine;
pub mod error;
pub mod handler;
pub mod master;
pub mod protocol;
pub mod publish;
pub mod shape;
pub mod tracker;
pub mod transport;

pub use config::{LinkConfig, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT};
pub use describe::{FrameFormat, ProtocolDescriber};
pub use engine::AsyncEngine;
pub use error::{BadCodeReason, DevlinkError, Result};
pub use handler::{HandlerInput, HandlerReply, HandlerResult, InboundHandler};
pub use master::Master;
pub use publish::{EngineEvent, MessagePublisher, NoopPublisher};
pub use shape::{Field, FieldValue, Shape};
pub use tracker::AckValue;
pub use transport::Transport;
