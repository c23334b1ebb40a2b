//! Inbound command handlers and their registry.
//!
//! The async engine dispatches received commands against a
//! [`HandlerRegistry`]: one entry per opcode, carrying the expected payload
//! [`Shape`], a broadcast-permission flag, and the handler itself. Handlers
//! are async; the worker awaits each one inline so inbound frames are
//! processed to completion in arrival order.
//!
//! # Example
//!
//! ```
//! use devlink::handler::{HandlerInput, HandlerReply, HandlerRegistry};
//! use devlink::shape::{Field, Shape};
//!
//! let mut registry = HandlerRegistry::new();
//! registry
//!     .register(0x31, Shape::fields([Field::U8]), false, |input| async move {
//!         let HandlerInput::Fields(values) = input else {
//!             unreachable!("shape guarantees fields");
//!         };
//!         Ok(HandlerReply::Payload(vec![values[0].as_u64() as u8 + 1]))
//!     })
//!     .unwrap();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::{BadCodeReason, DevlinkError, Result};
use crate::protocol::is_valid_command_opcode;
use crate::shape::{FieldValue, Shape};

/// Boxed future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type handlers may fail with; converted to an EXECERR reply.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerReply {
    /// Success without data: positive ACK with empty payload.
    Done,
    /// Success with data: positive ACK carrying these bytes.
    Payload(Vec<u8>),
    /// Application-level rejection: bad-command reply with this reason.
    Fail(BadCodeReason),
}

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<HandlerReply, HandlerError>;

/// Decoded payload passed to a handler, per its registered shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerInput {
    /// Registered shape was [`Shape::Empty`].
    Empty,
    /// Registered shape was [`Shape::Raw`]: the opaque payload bytes.
    Raw(Bytes),
    /// Fixed shape: the decoded field values.
    Fields(Vec<FieldValue>),
}

/// Trait for inbound command handlers.
pub trait InboundHandler: Send + Sync + 'static {
    /// Handle one decoded command.
    fn call(&self, input: HandlerInput) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter implementing [`InboundHandler`] for async closures.
pub struct FnHandler<F>(F);

impl<F, Fut> InboundHandler for FnHandler<F>
where
    F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, input: HandlerInput) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.0)(input))
    }
}

/// Entry for one registered opcode.
pub struct RegistryEntry {
    /// Expected payload shape.
    pub shape: Shape,
    /// Whether broadcast frames may invoke this handler.
    pub broadcast_allowed: bool,
    /// The handler itself.
    pub handler: Box<dyn InboundHandler>,
}

/// Mapping from inbound opcode to handler configuration.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<u8, RegistryEntry>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `opcode`.
    ///
    /// Rejects acknowledgement opcodes (high bit set), the reserved opcode
    /// 0x70, and opcodes that already have an entry.
    pub fn register<F, Fut>(
        &mut self,
        opcode: u8,
        shape: Shape,
        broadcast_allowed: bool,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_boxed(opcode, shape, broadcast_allowed, Box::new(FnHandler(handler)))
    }

    /// Register a pre-boxed handler for `opcode`.
    pub fn register_boxed(
        &mut self,
        opcode: u8,
        shape: Shape,
        broadcast_allowed: bool,
        handler: Box<dyn InboundHandler>,
    ) -> Result<()> {
        if !is_valid_command_opcode(opcode) {
            return Err(DevlinkError::Config(format!(
                "opcode {:#04x} is not a registrable command opcode",
                opcode
            )));
        }
        if self.entries.contains_key(&opcode) {
            return Err(DevlinkError::Config(format!(
                "opcode {:#04x} is already registered",
                opcode
            )));
        }
        self.entries.insert(
            opcode,
            RegistryEntry {
                shape,
                broadcast_allowed,
                handler,
            },
        );
        Ok(())
    }

    /// Remove the entry for `opcode`, making it re-registrable.
    pub fn unregister(&mut self, opcode: u8) -> bool {
        self.entries.remove(&opcode).is_some()
    }

    /// Look up the entry for `opcode`.
    pub fn get(&self, opcode: u8) -> Option<&RegistryEntry> {
        self.entries.get(&opcode)
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
