//! Optional sideband event sink.
//!
//! Engines emit [`EngineEvent`]s through a [`MessagePublisher`] so an
//! application can observe command completions and inbound dispatches without
//! hooking the data path. The default [`NoopPublisher`] discards everything.

/// Notification emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An outbound command reached a terminal state.
    CommandCompleted {
        /// Destination address, if the channel is addressed.
        addr: Option<u8>,
        /// Command opcode.
        opcode: u8,
        /// Whether the command completed positively.
        ok: bool,
    },
    /// An inbound command was dispatched to a registered handler.
    InboundDispatched {
        /// Command opcode.
        opcode: u8,
        /// Whether the command arrived on the broadcast address.
        broadcast: bool,
    },
}

/// Sink for engine notification events.
pub trait MessagePublisher: Send + Sync {
    /// Publish one event. Must not block for long; the engine worker calls
    /// this inline.
    fn publish(&self, event: EngineEvent);
}

/// Publisher that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl MessagePublisher for NoopPublisher {
    fn publish(&self, _event: EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<EngineEvent>>);

    impl MessagePublisher for Recording {
        fn publish(&self, event: EngineEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_noop_accepts_events() {
        NoopPublisher.publish(EngineEvent::InboundDispatched {
            opcode: 0x30,
            broadcast: false,
        });
    }

    #[test]
    fn test_recording_publisher() {
        let publisher = Recording(Mutex::new(Vec::new()));
        publisher.publish(EngineEvent::CommandCompleted {
            addr: Some(0x55),
            opcode: 0x10,
            ok: true,
        });
        let events = publisher.0.lock().unwrap();
        assert_eq!(events.len(), 1);
    }
}
