//! Per-command retry and acknowledgement state machine.
//!
//! A [`CmdTracker`] owns everything one outbound command needs: the on-wire
//! message, the retry schedule, and the decoded terminal result. Engines call
//! [`maybe_transmit`](CmdTracker::maybe_transmit) on every scan and feed
//! received frames through [`try_match`](CmdTracker::try_match); the tracker
//! itself never performs I/O and never errors, it only records outcomes.
//!
//! Lifecycle: Pending -> Inflight -> (acked | rejected | broadcast-done |
//! exhausted). Exhaustion is observed by the engine when the tracker is no
//! longer alive and holds no result.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::BadCodeReason;
use crate::protocol::{encode_command, Frame, ACK_BIT, BAD_CMD_OPCODE, BROADCAST_ADDR};
use crate::shape::{FieldValue, Shape};

/// Decoded value of a positive acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckValue {
    /// Success without data: empty-shape ACK or completed broadcast.
    Done,
    /// Raw ACK payload (shape [`Shape::Raw`]).
    Bytes(Bytes),
    /// Single decoded field (single-field shapes unwrap to a scalar).
    Scalar(FieldValue),
    /// Multiple decoded fields.
    Fields(Vec<FieldValue>),
}

/// Terminal state of a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerResult {
    /// Positive acknowledgement (or broadcast transmission) completed.
    Acked(AckValue),
    /// Peer replied with a bad-command frame.
    Rejected(BadCodeReason),
}

/// State machine for one outbound command.
#[derive(Debug)]
pub struct CmdTracker {
    /// Destination address, `None` on unaddressed channels.
    addr: Option<u8>,
    /// Command bytes: opcode followed by payload.
    msg: Bytes,
    /// Expected ACK payload shape.
    ack_shape: Shape,
    /// Retry interval.
    timeout: Duration,
    /// Next send is due once this instant passes; `None` means immediately.
    deadline: Option<Instant>,
    /// Sends left, including the initial transmission.
    remaining: u32,
    /// Terminal result, set exactly once.
    result: Option<TrackerResult>,
}

impl CmdTracker {
    /// Create a tracker for `msg` (opcode + payload, non-empty).
    ///
    /// `attempts` counts retransmissions beyond the first send; the tracker
    /// therefore starts with `attempts + 1` sends available. The first
    /// [`maybe_transmit`](Self::maybe_transmit) call fires immediately.
    pub fn new(
        addr: Option<u8>,
        msg: Bytes,
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Self {
        debug_assert!(!msg.is_empty());
        Self {
            addr,
            msg,
            ack_shape,
            timeout,
            deadline: None,
            remaining: attempts + 1,
            result: None,
        }
    }

    /// The command opcode.
    #[inline]
    pub fn opcode(&self) -> u8 {
        self.msg[0]
    }

    /// The destination address.
    #[inline]
    pub fn addr(&self) -> Option<u8> {
        self.addr
    }

    /// The terminal result, if the tracker has completed.
    #[inline]
    pub fn result(&self) -> Option<&TrackerResult> {
        self.result.as_ref()
    }

    /// Consume the tracker, yielding its terminal result.
    #[inline]
    pub fn into_result(self) -> Option<TrackerResult> {
        self.result
    }

    /// Whether the command can still complete.
    ///
    /// A tracker stays alive through the reply window of its final send:
    /// it dies only once a result is recorded, or once no sends remain and
    /// the last deadline has passed.
    pub fn is_alive(&self, now: Instant) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.remaining > 0 || self.deadline.is_some_and(|d| now < d)
    }

    /// Produce the on-wire bytes of the next (re)transmission, if one is due.
    ///
    /// Decrements the send budget and arms the next deadline. Broadcast
    /// commands collapse to a single transmission and complete as
    /// [`AckValue::Done`] immediately after it.
    pub fn maybe_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.result.is_some() || self.remaining == 0 {
            return None;
        }
        if let Some(deadline) = self.deadline {
            if now < deadline {
                return None;
            }
        }

        self.remaining -= 1;
        self.deadline = Some(now + self.timeout);
        let wire = encode_command(self.addr, &self.msg);

        if self.addr == Some(BROADCAST_ADDR) {
            // No reply is ever expected on the broadcast address.
            self.remaining = 0;
            self.result = Some(TrackerResult::Acked(AckValue::Done));
        }

        Some(wire)
    }

    /// Try to claim a received frame for this command.
    ///
    /// Returns `true` when the frame belongs to this tracker (and must not be
    /// offered to anyone else), whether or not it completed the command: a
    /// size-mismatched ACK is claimed, logged, and ignored so retries
    /// continue.
    pub fn try_match(&mut self, frame: &Frame) -> bool {
        if self.result.is_some() {
            return false;
        }
        // Replies echo the address the command was sent to.
        if self.addr.is_some() && frame.addr != self.addr {
            return false;
        }

        if frame.opcode == BAD_CMD_OPCODE {
            return self.match_bad_cmd(frame);
        }

        if frame.opcode == self.opcode() | ACK_BIT {
            return self.match_ack(frame);
        }

        false
    }

    fn match_bad_cmd(&mut self, frame: &Frame) -> bool {
        let (orig, reason) = match frame.payload[..] {
            [orig, reason, ..] => (orig, reason),
            _ => return false,
        };
        if orig != self.opcode() {
            return false;
        }
        self.result = Some(TrackerResult::Rejected(BadCodeReason::from_wire(reason)));
        true
    }

    fn match_ack(&mut self, frame: &Frame) -> bool {
        let value = match &self.ack_shape {
            Shape::Raw => AckValue::Bytes(frame.payload.clone()),
            Shape::Empty => {
                if !frame.payload.is_empty() {
                    tracing::warn!(
                        opcode = format_args!("{:#04x}", self.opcode()),
                        len = frame.payload.len(),
                        "unexpected payload on empty-shape ack"
                    );
                    return true;
                }
                AckValue::Done
            }
            shape @ Shape::Fields(_) => match shape.decode(&frame.payload) {
                Some(mut values) => {
                    if values.len() == 1 {
                        AckValue::Scalar(values.remove(0))
                    } else {
                        AckValue::Fields(values)
                    }
                }
                None => {
                    tracing::warn!(
                        opcode = format_args!("{:#04x}", self.opcode()),
                        expected = shape.wire_len(),
                        got = frame.payload.len(),
                        "ack payload size mismatch"
                    );
                    return true;
                }
            },
        };
        self.result = Some(TrackerResult::Acked(value));
        true
    }
}
