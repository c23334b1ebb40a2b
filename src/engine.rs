//! Full-duplex command engine.
//!
//! [`AsyncEngine`] is a superset of [`Master`](crate::Master): one dedicated
//! worker task owns the transport and concurrently (a) drives every
//! outstanding outbound tracker and (b) parses, dispatches, and answers
//! inbound commands against the handler registry.
//!
//! Application tasks calling [`send_to`](AsyncEngine::send_to) never touch
//! the transport themselves: they enqueue a tracker slot and wait on its
//! one-shot completion signal. The wait carries a forward-progress bound so a
//! dead worker cannot strand a caller.
//!
//! # Worker loop
//!
//! 1. Pull at most one frame from the transport with a short read timeout.
//! 2. Scan the tracker list: transmit due frames, let the first matching
//!    tracker consume the received frame, complete exhausted trackers.
//! 3. Feed an unconsumed frame to the inbound parser, which replies with a
//!    positive ACK, a bad-command frame, or silence (broadcast, not-ours,
//!    unclaimed ACK).
//!
//! Each inbound frame is handled exactly once and to completion before the
//! next read.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::LinkConfig;
use crate::describe::ProtocolDescriber;
use crate::error::{BadCodeReason, DevlinkError, Result};
use crate::handler::{HandlerInput, HandlerRegistry, HandlerReply, InboundHandler};
use crate::master::READ_SLICE;
use crate::protocol::{
    encode_ack, encode_bad_cmd, is_valid_command_opcode, Frame, ACK_BIT, BROADCAST_ADDR,
};
use crate::publish::{EngineEvent, MessagePublisher, NoopPublisher};
use crate::shape::Shape;
use crate::tracker::{AckValue, CmdTracker, TrackerResult};
use crate::transport::Transport;

/// Extra wait slack beyond the theoretical retry schedule.
const WAIT_SLACK: Duration = Duration::from_millis(100);

struct TrackerSlot {
    id: u64,
    tracker: CmdTracker,
    done: Option<oneshot::Sender<Result<AckValue>>>,
}

struct Shared {
    config: LinkConfig,
    trackers: Mutex<Vec<TrackerSlot>>,
    registry: Mutex<HandlerRegistry>,
    describer: Mutex<Option<ProtocolDescriber>>,
    slave_describer: Mutex<Option<ProtocolDescriber>>,
    publisher: Mutex<Arc<dyn MessagePublisher>>,
    /// Kind and message of the transport error that killed the worker.
    fault: Mutex<Option<(io::ErrorKind, String)>>,
    next_id: AtomicU64,
}

impl Shared {
    fn fault_error(&self) -> Option<DevlinkError> {
        self.fault
            .lock()
            .unwrap()
            .as_ref()
            .map(|(kind, msg)| DevlinkError::Transport(io::Error::new(*kind, msg.clone())))
    }

    fn publish(&self, event: EngineEvent) {
        self.publisher.lock().unwrap().publish(event);
    }
}

struct Worker {
    handle: JoinHandle<Box<dyn Transport>>,
    shutdown: watch::Sender<bool>,
}

/// Full-duplex engine: concurrent outbound commands plus inbound dispatch.
pub struct AsyncEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl AsyncEngine {
    /// Create the engine over `transport` and start its worker immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: impl Transport + 'static, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            config,
            trackers: Mutex::new(Vec::new()),
            registry: Mutex::new(HandlerRegistry::new()),
            describer: Mutex::new(None),
            slave_describer: Mutex::new(None),
            publisher: Mutex::new(Arc::new(NoopPublisher)),
            fault: Mutex::new(None),
            next_id: AtomicU64::new(1),
        });
        let worker = spawn_worker(Box::new(transport), shared.clone());
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The channel configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Whether the worker is currently running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Register an inbound command handler.
    ///
    /// Rejects acknowledgement opcodes, the reserved opcode 0x70, and
    /// duplicates. Entries live until [`unregister_incoming`] replaces them.
    ///
    /// [`unregister_incoming`]: Self::unregister_incoming
    pub fn register_incoming<F, Fut>(
        &self,
        opcode: u8,
        shape: Shape,
        broadcast_allowed: bool,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(HandlerInput) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::handler::HandlerResult> + Send + 'static,
    {
        self.shared
            .registry
            .lock()
            .unwrap()
            .register(opcode, shape, broadcast_allowed, handler)
    }

    /// Register a pre-boxed handler (see [`InboundHandler`]).
    pub fn register_incoming_boxed(
        &self,
        opcode: u8,
        shape: Shape,
        broadcast_allowed: bool,
        handler: Box<dyn InboundHandler>,
    ) -> Result<()> {
        self.shared
            .registry
            .lock()
            .unwrap()
            .register_boxed(opcode, shape, broadcast_allowed, handler)
    }

    /// Remove a registered handler, making the opcode re-registrable.
    pub fn unregister_incoming(&self, opcode: u8) -> bool {
        self.shared.registry.lock().unwrap().unregister(opcode)
    }

    /// Attach a describer for outbound frame debug logging.
    pub fn attach_protocol_describer(&self, describer: ProtocolDescriber) {
        *self.shared.describer.lock().unwrap() = Some(describer);
    }

    /// Attach a separate describer for inbound frame debug logging.
    pub fn attach_slave_describer(&self, describer: ProtocolDescriber) {
        *self.shared.slave_describer.lock().unwrap() = Some(describer);
    }

    /// Replace the event publisher.
    pub fn set_publisher(&self, publisher: Arc<dyn MessagePublisher>) {
        *self.shared.publisher.lock().unwrap() = publisher;
    }

    /// Send a command to the channel's default address with default timing.
    pub async fn send(&self, msg: &[u8], ack_shape: Shape) -> Result<AckValue> {
        let config = &self.shared.config;
        self.run_command(config.address, msg, ack_shape, config.timeout, config.attempts)
            .await
    }

    /// Send a command to the channel's default address with explicit timing.
    pub async fn send_with(
        &self,
        msg: &[u8],
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Result<AckValue> {
        self.run_command(self.shared.config.address, msg, ack_shape, timeout, attempts)
            .await
    }

    /// Send a command to an explicit address; `addr == 0` broadcasts.
    pub async fn send_to(&self, addr: u8, msg: &[u8], ack_shape: Shape) -> Result<AckValue> {
        let config = &self.shared.config;
        self.send_to_with(addr, msg, ack_shape, config.timeout, config.attempts)
            .await
    }

    /// Send a command to an explicit address with explicit timing.
    pub async fn send_to_with(
        &self,
        addr: u8,
        msg: &[u8],
        ack_shape: Shape,
        timeout: Duration,
        attempts: u32,
    ) -> Result<AckValue> {
        if !self.shared.config.is_addressed() {
            return Err(DevlinkError::Config(
                "send_to requires an addressed channel".to_string(),
            ));
        }
        self.run_command(Some(addr), msg, ack_shape, timeout, attempts)
            .await
    }

    async fn run_command(
        &self,
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
        if let Some(err) = self.shared.fault_error() {
            return Err(err);
        }
        if !self.is_running() {
            return Err(DevlinkError::Closed);
        }

        let (done_tx, done_rx) = oneshot::channel();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut slots = self.shared.trackers.lock().unwrap();
            slots.push(TrackerSlot {
                id,
                tracker: CmdTracker::new(
                    addr,
                    Bytes::copy_from_slice(msg),
                    ack_shape,
                    timeout,
                    attempts,
                ),
                done: Some(done_tx),
            });
        }

        // Forward-progress bound: twice the full retry schedule plus slack,
        // so a dead worker cannot strand the caller.
        let bound = timeout
            .saturating_mul(attempts.saturating_add(1))
            .saturating_mul(2)
            + WAIT_SLACK;

        match tokio::time::timeout(bound, done_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => {
                self.shared
                    .trackers
                    .lock()
                    .unwrap()
                    .retain(|slot| slot.id != id);
                Err(self.shared.fault_error().unwrap_or(DevlinkError::Closed))
            }
        }
    }

    /// Stop the worker and reclaim the transport without closing it.
    ///
    /// In-flight waiters are released with [`DevlinkError::Closed`].
    pub async fn stop(&self) -> Result<Box<dyn Transport>> {
        let worker = self
            .worker
            .lock()
            .unwrap()
            .take()
            .ok_or(DevlinkError::Closed)?;
        let _ = worker.shutdown.send(true);
        worker
            .handle
            .await
            .map_err(|e| DevlinkError::Config(format!("worker panicked: {}", e)))
    }

    /// Stop the worker and close the transport.
    pub async fn close(&self) -> Result<()> {
        let mut transport = self.stop().await?;
        transport.close().await?;
        Ok(())
    }

    /// Swap the transport: stops the worker, installs `transport`, restarts.
    ///
    /// Returns the previous transport so the caller can close or reuse it.
    pub async fn set_transport(
        &self,
        transport: impl Transport + 'static,
    ) -> Result<Box<dyn Transport>> {
        let old = self.stop().await?;
        *self.shared.fault.lock().unwrap() = None;
        *self.worker.lock().unwrap() = Some(spawn_worker(Box::new(transport), self.shared.clone()));
        Ok(old)
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        // The worker exits at its next loop turn once the flag flips.
        if let Some(worker) = self.worker.get_mut().unwrap().take() {
            let _ = worker.shutdown.send(true);
        }
    }
}

fn spawn_worker(transport: Box<dyn Transport>, shared: Arc<Shared>) -> Worker {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker_loop(transport, shared, shutdown_rx));
    Worker {
        handle,
        shutdown: shutdown_tx,
    }
}

/// One terminal tracker, lifted out of the lock for signalling.
struct Completion {
    done: Option<oneshot::Sender<Result<AckValue>>>,
    result: Result<AckValue>,
    addr: Option<u8>,
    opcode: u8,
    ok: bool,
}

async fn worker_loop(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) -> Box<dyn Transport> {
    let addressed = shared.config.is_addressed();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let rx = tokio::select! {
            res = transport.read(READ_SLICE) => match res {
                Ok(bytes) => bytes,
                Err(e) => {
                    worker_fault(&shared, &e);
                    return transport;
                }
            },
            _ = shutdown.changed() => break,
        };

        let frame = if rx.is_empty() {
            None
        } else {
            if let Some(describer) = shared.slave_describer.lock().unwrap().as_ref() {
                tracing::debug!(frame = %describer.describe(&rx), "rx");
            }
            Frame::parse(&rx, addressed)
        };

        // Scan the tracker list: transmit, match, and collect terminals.
        let now = Instant::now();
        let mut writes: Vec<Vec<u8>> = Vec::new();
        let mut completions: Vec<Completion> = Vec::new();
        let mut consumed = false;
        {
            let mut slots = shared.trackers.lock().unwrap();
            slots.retain_mut(|slot| {
                if let Some(wire) = slot.tracker.maybe_transmit(now) {
                    writes.push(wire);
                }
                if !consumed {
                    if let Some(f) = &frame {
                        consumed = slot.tracker.try_match(f);
                    }
                }
                let (result, ok) = match slot.tracker.result() {
                    Some(TrackerResult::Acked(value)) => (Ok(value.clone()), true),
                    Some(TrackerResult::Rejected(reason)) => (
                        Err(DevlinkError::BadCode {
                            opcode: slot.tracker.opcode(),
                            reason: *reason,
                        }),
                        false,
                    ),
                    None => {
                        if slot.tracker.is_alive(now) {
                            return true;
                        }
                        (
                            Err(DevlinkError::NoAnswer {
                                opcode: slot.tracker.opcode(),
                            }),
                            false,
                        )
                    }
                };
                completions.push(Completion {
                    done: slot.done.take(),
                    result,
                    addr: slot.tracker.addr(),
                    opcode: slot.tracker.opcode(),
                    ok,
                });
                false
            });
        }

        for wire in &writes {
            if let Some(describer) = shared.describer.lock().unwrap().as_ref() {
                tracing::debug!(frame = %describer.describe(wire), "tx");
            }
            if let Err(e) = transport.write(wire).await {
                worker_fault(&shared, &e);
                return transport;
            }
        }

        for completion in completions {
            shared.publish(EngineEvent::CommandCompleted {
                addr: completion.addr,
                opcode: completion.opcode,
                ok: completion.ok,
            });
            if let Some(done) = completion.done {
                let _ = done.send(completion.result);
            }
        }

        if let Some(frame) = frame {
            if !consumed {
                if let Some(reply) = dispatch_inbound(&shared, frame).await {
                    if let Err(e) = transport.write(&reply).await {
                        worker_fault(&shared, &e);
                        return transport;
                    }
                }
            }
        }
    }

    release_waiters(&shared, || DevlinkError::Closed);
    transport
}

/// Record the fatal transport error and release every waiter with it.
fn worker_fault(shared: &Shared, error: &io::Error) {
    tracing::error!(%error, "engine worker stopped on transport error");
    *shared.fault.lock().unwrap() = Some((error.kind(), error.to_string()));
    let kind = error.kind();
    let msg = error.to_string();
    release_waiters(shared, move || {
        DevlinkError::Transport(io::Error::new(kind, msg.clone()))
    });
}

fn release_waiters(shared: &Shared, mut make_err: impl FnMut() -> DevlinkError) {
    let mut slots = shared.trackers.lock().unwrap();
    for mut slot in slots.drain(..) {
        if let Some(done) = slot.done.take() {
            let _ = done.send(Err(make_err()));
        }
    }
}

/// What the inbound parser decided to do with a frame, computed under the
/// registry lock so the handler future can be awaited outside it.
enum Dispatch {
    Silent,
    Reply(Vec<u8>),
    Run {
        future: crate::handler::BoxFuture<'static, crate::handler::HandlerResult>,
        broadcast: bool,
    },
}

async fn dispatch_inbound(shared: &Shared, frame: Frame) -> Option<Vec<u8>> {
    let own = shared.config.address;

    // Addressing rules: broadcast is marked, foreign addresses are dropped.
    let broadcast = match (own, frame.addr) {
        (Some(_), Some(BROADCAST_ADDR)) => true,
        (Some(own_addr), Some(addr)) if addr == own_addr => false,
        (Some(_), _) => return None,
        (None, _) => false,
    };

    // An ACK nobody claimed is not a command; drop silently.
    if frame.opcode & ACK_BIT != 0 {
        return None;
    }
    let opcode = frame.opcode;

    let dispatch = {
        let registry = shared.registry.lock().unwrap();
        match registry.get(opcode) {
            None => {
                tracing::debug!(
                    opcode = format_args!("{:#04x}", opcode),
                    "inbound command with no registered handler"
                );
                if broadcast {
                    Dispatch::Silent
                } else {
                    Dispatch::Reply(encode_bad_cmd(own, opcode, BadCodeReason::Unknown.to_wire()))
                }
            }
            Some(entry) => {
                if broadcast && !entry.broadcast_allowed {
                    Dispatch::Silent
                } else {
                    match decode_input(&entry.shape, &frame) {
                        Some(input) => Dispatch::Run {
                            future: entry.handler.call(input),
                            broadcast,
                        },
                        None => {
                            tracing::warn!(
                                opcode = format_args!("{:#04x}", opcode),
                                len = frame.payload.len(),
                                "inbound payload size mismatch"
                            );
                            if broadcast {
                                Dispatch::Silent
                            } else {
                                Dispatch::Reply(encode_bad_cmd(
                                    own,
                                    opcode,
                                    BadCodeReason::SizeErr.to_wire(),
                                ))
                            }
                        }
                    }
                }
            }
        }
    };

    match dispatch {
        Dispatch::Silent => None,
        Dispatch::Reply(reply) => Some(reply),
        Dispatch::Run { future, broadcast } => {
            shared.publish(EngineEvent::InboundDispatched { opcode, broadcast });
            let reply = match future.await {
                Ok(HandlerReply::Done) => encode_ack(own, opcode, &[]),
                Ok(HandlerReply::Payload(bytes)) => encode_ack(own, opcode, &bytes),
                Ok(HandlerReply::Fail(reason)) => encode_bad_cmd(own, opcode, reason.to_wire()),
                Err(error) => {
                    tracing::error!(
                        opcode = format_args!("{:#04x}", opcode),
                        %error,
                        "handler failed"
                    );
                    encode_bad_cmd(own, opcode, BadCodeReason::ExecErr.to_wire())
                }
            };
            // Replies to broadcast commands are suppressed, even errors.
            (!broadcast).then_some(reply)
        }
    }
}

fn decode_input(shape: &Shape, frame: &Frame) -> Option<HandlerInput> {
    match shape {
        Shape::Raw => Some(HandlerInput::Raw(frame.payload.clone())),
        Shape::Empty => frame.payload.is_empty().then_some(HandlerInput::Empty),
        fields @ Shape::Fields(_) => fields
            .decode(&frame.payload)
            .map(HandlerInput::Fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Field;
    use crate::transport::ChannelTransport;

    fn engine_pair(address: u8) -> (AsyncEngine, ChannelTransport) {
        let (local, peer) = ChannelTransport::pair();
        let engine = AsyncEngine::new(local, LinkConfig::addressed(address)).unwrap();
        (engine, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_size_error_reply() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x30, Shape::fields([Field::U16]), false, |_input| async {
                assert!(false, "handler must not run on size mismatch");
                Ok(HandlerReply::Done)
            })
            .unwrap();

        peer.write(&[0x55, 0x30, 0xAA]).await.unwrap();
        let reply = peer.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xF0, 0x30, 0x03]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_dispatch_with_payload_reply() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x31, Shape::fields([Field::U8]), false, |input| async move {
                let HandlerInput::Fields(values) = input else {
                    panic!("expected fields");
                };
                assert_eq!(values[0].as_u64(), 7);
                Ok(HandlerReply::Payload(vec![0x42]))
            })
            .unwrap();

        peer.write(&[0x55, 0x31, 0x07]).await.unwrap();
        let reply = peer.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xB1, 0x42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_unknown_opcode() {
        let (engine, mut peer) = engine_pair(0x55);
        let _ = &engine;

        peer.write(&[0x55, 0x33]).await.unwrap();
        let reply = peer.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xF0, 0x33, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_foreign_address_dropped() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x30, Shape::Raw, false, |_| async {
                Ok(HandlerReply::Done)
            })
            .unwrap();

        peer.write(&[0x02, 0x30, 0x01]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_invokes_but_never_replies() {
        use std::sync::atomic::AtomicUsize;

        let (engine, mut peer) = engine_pair(0x55);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        engine
            .register_incoming(0x30, Shape::Raw, true, move |_| {
                let calls = calls_in_handler.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(HandlerReply::Payload(vec![0x99]))
                }
            })
            .unwrap();

        peer.write(&[0x00, 0x30, 0x01]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_not_allowed_dropped() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x30, Shape::Raw, false, |_| async {
                Ok(HandlerReply::Done)
            })
            .unwrap();

        peer.write(&[0x00, 0x30]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_size_mismatch_stays_silent() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x30, Shape::fields([Field::U16]), true, |_| async {
                Ok(HandlerReply::Done)
            })
            .unwrap();

        // One byte against a two-byte shape: no SIZEERR on broadcast.
        peer.write(&[0x00, 0x30, 0xAA]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_unknown_stays_silent() {
        let (engine, mut peer) = engine_pair(0x55);
        let _ = &engine;

        peer.write(&[0x00, 0x44]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_becomes_execerr() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x32, Shape::Empty, false, |_| async {
                Err("device busy".into())
            })
            .unwrap();

        peer.write(&[0x55, 0x32]).await.unwrap();
        let reply = peer.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xF0, 0x32, 0x01]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_fail_reason_forwarded() {
        let (engine, mut peer) = engine_pair(0x55);
        engine
            .register_incoming(0x32, Shape::Empty, false, |_| async {
                Ok(HandlerReply::Fail(BadCodeReason::Other(9)))
            })
            .unwrap();

        peer.write(&[0x55, 0x32]).await.unwrap();
        let reply = peer.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xF0, 0x32, 0x09]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_ack_dropped_silently() {
        let (engine, mut peer) = engine_pair(0x55);
        let _ = &engine;

        peer.write(&[0x55, 0x90, 0xAA]).await.unwrap();
        assert!(peer
            .read(Duration::from_millis(200))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_send_via_worker() {
        let (engine, mut peer) = engine_pair(0x55);

        let peer_task = tokio::spawn(async move {
            let cmd = peer.read(Duration::from_secs(1)).await.unwrap();
            assert_eq!(&cmd[..], &[0x55, 0x10]);
            peer.write(&[0x55, 0x90, 0xAA, 0xBB]).await.unwrap();
            peer
        });

        let ack = engine.send(&[0x10], Shape::Raw).await.unwrap();
        assert_eq!(ack, AckValue::Bytes(Bytes::from_static(&[0xAA, 0xBB])));
        peer_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_commands_distinct_opcodes() {
        let (engine, mut peer) = engine_pair(0x55);
        let engine = Arc::new(engine);

        let peer_task = tokio::spawn(async move {
            // Answer both commands, whichever order they arrive in.
            let mut answered = 0;
            while answered < 2 {
                let cmd = peer.read(Duration::from_secs(1)).await.unwrap();
                if cmd.is_empty() {
                    continue;
                }
                peer.write(&[0x55, cmd[1] | 0x80, cmd[1]]).await.unwrap();
                answered += 1;
            }
            peer
        });

        let (a, b) = tokio::join!(
            engine.send(&[0x10], Shape::Raw),
            engine.send(&[0x11], Shape::Raw),
        );
        assert_eq!(a.unwrap(), AckValue::Bytes(Bytes::from_static(&[0x10])));
        assert_eq!(b.unwrap(), AckValue::Bytes(Bytes::from_static(&[0x11])));
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_no_answer() {
        let (engine, _peer) = engine_pair(0x55);

        let err = engine
            .send_with(&[0x11], Shape::Empty, Duration::from_millis(100), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DevlinkError::NoAnswer { opcode: 0x11 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_death_releases_waiters() {
        let (engine, mut peer) = engine_pair(0x55);
        peer.close().await.unwrap();

        let err = engine.send(&[0x10], Shape::Raw).await.unwrap_err();
        assert!(matches!(err, DevlinkError::Transport(_)));
        // Fault is sticky for later calls.
        let err = engine.send(&[0x10], Shape::Raw).await.unwrap_err();
        assert!(matches!(err, DevlinkError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_waiters() {
        let (engine, _peer) = engine_pair(0x55);
        let engine = Arc::new(engine);

        let sender = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .send_with(&[0x10], Shape::Raw, Duration::from_secs(5), 3)
                    .await
            })
        };

        // Give the send a moment to enqueue, then close.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.close().await.unwrap();

        let err = sender.await.unwrap().unwrap_err();
        assert!(matches!(err, DevlinkError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_transport_restarts_worker() {
        let (local_a, _peer_a) = ChannelTransport::pair();
        let (local_b, mut peer_b) = ChannelTransport::pair();
        let engine = AsyncEngine::new(local_a, LinkConfig::addressed(0x55)).unwrap();
        engine
            .register_incoming(0x30, Shape::Empty, false, |_| async {
                Ok(HandlerReply::Done)
            })
            .unwrap();

        let _old = engine.set_transport(local_b).await.unwrap();
        assert!(engine.is_running());

        peer_b.write(&[0x55, 0x30]).await.unwrap();
        let reply = peer_b.read(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&reply[..], &[0x55, 0xB0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_close_fails_fast() {
        let (engine, _peer) = engine_pair(0x55);
        engine.close().await.unwrap();
        let err = engine.send(&[0x10], Shape::Raw).await.unwrap_err();
        assert!(matches!(err, DevlinkError::Closed));
    }
}
