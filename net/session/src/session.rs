//! Core session management: one live TCP connection per session.
//!
//! A session owns its socket, accumulates inbound bytes, emits fully-framed
//! packets to registered handlers, tracks heartbeat liveness, and serializes
//! outbound writes. The I/O task runs on the owning client's or server's
//! reactor thread; handlers must not block it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use netframe_wire::{encode_packet, Packet, PacketDecoder, PacketType, WireError, DEFAULT_MAX_PAYLOAD};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for a session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Interval between outgoing HEARTBEAT packets
    pub heartbeat_interval: Duration,
    /// Close the session when no HEARTBEAT arrives for this long
    pub heartbeat_timeout: Duration,
    /// Maximum payload size accepted or produced, in bytes
    pub max_payload: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Session lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected and exchanging packets
    Open = 0,
    /// Teardown requested; no further sends accepted
    Closing = 1,
    /// Socket torn down; close hooks have fired (terminal)
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Callback invoked with an inbound packet on the reactor thread.
pub type PacketHandler = Arc<dyn Fn(&SessionHandle, Packet) + Send + Sync>;

type CloseHook = Box<dyn FnOnce(&SessionHandle) + Send>;

/// Packet-type keyed handler table plus one fallback slot.
#[derive(Default)]
pub(crate) struct HandlerTable {
    by_type: RwLock<HashMap<u8, PacketHandler>>,
    fallback: RwLock<Option<PacketHandler>>,
}

impl HandlerTable {
    pub(crate) fn set(&self, packet_type: PacketType, handler: PacketHandler) {
        self.by_type
            .write()
            .expect("handler table poisoned")
            .insert(packet_type.as_u8(), handler);
    }

    pub(crate) fn set_fallback(&self, handler: PacketHandler) {
        *self.fallback.write().expect("handler table poisoned") = Some(handler);
    }

    fn resolve(&self, packet_type: PacketType) -> Option<PacketHandler> {
        let by_type = self.by_type.read().expect("handler table poisoned");
        if let Some(handler) = by_type.get(&packet_type.as_u8()) {
            return Some(Arc::clone(handler));
        }
        drop(by_type);
        self.fallback
            .read()
            .expect("handler table poisoned")
            .clone()
    }
}

/// Commands consumed by the session's write loop.
pub(crate) enum Outbound {
    /// One pre-encoded frame to write
    Frame(Bytes),
    /// Stop the I/O task
    Shutdown,
}

struct Shared {
    id: String,
    remote_addr: SocketAddr,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Outbound>,
    handlers: Arc<HandlerTable>,
    close_hooks: Mutex<Vec<CloseHook>>,
    max_payload: usize,
}

/// Cheaply cloneable handle to one live session.
///
/// The handle outlives the I/O task: once the session reaches
/// [`SessionState::Closed`], [`send`](SessionHandle::send) becomes a
/// reported no-op and close hooks registered afterwards run immediately.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub(crate) fn new_pair(
        remote_addr: SocketAddr,
        handlers: Arc<HandlerTable>,
        config: &SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4().simple().to_string(),
                remote_addr,
                state: AtomicU8::new(SessionState::Open as u8),
                outbound,
                handlers,
                close_hooks: Mutex::new(Vec::new()),
                max_payload: config.max_payload,
            }),
        };
        (handle, rx)
    }

    /// Unique session id, generated at construction.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Remote peer address, resolved once at accept/connect time.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Remote peer port.
    pub fn remote_port(&self) -> u16 {
        self.shared.remote_addr.port()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Register a handler for one packet type, replacing any earlier one.
    pub fn on_packet<F>(&self, packet_type: PacketType, handler: F)
    where
        F: Fn(&SessionHandle, Packet) + Send + Sync + 'static,
    {
        self.shared.handlers.set(packet_type, Arc::new(handler));
    }

    /// Register the fallback handler for packet types without their own.
    pub fn on_fallback<F>(&self, handler: F)
    where
        F: Fn(&SessionHandle, Packet) + Send + Sync + 'static,
    {
        self.shared.handlers.set_fallback(Arc::new(handler));
    }

    /// Register a hook that fires exactly once when the session closes.
    ///
    /// A hook registered after the session already closed runs immediately.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce(&SessionHandle) + Send + 'static,
    {
        let hook: CloseHook = Box::new(hook);
        let run_now = {
            let mut hooks = self.shared.close_hooks.lock().expect("close hooks poisoned");
            if self.state() == SessionState::Closed {
                Some(hook)
            } else {
                hooks.push(hook);
                None
            }
        };
        if let Some(hook) = run_now {
            run_close_hook(self, hook);
        }
    }

    /// Serialize a packet and queue it for writing.
    ///
    /// Reports and drops the packet when the session is not open or the
    /// payload exceeds the configured maximum; never panics or errors.
    pub fn send(&self, packet: Packet) {
        if self.state() != SessionState::Open {
            warn!("dropping send on non-open session {}", self.id());
            return;
        }
        match encode_packet(&packet, self.shared.max_payload) {
            Ok(frame) => {
                if self.shared.outbound.send(Outbound::Frame(frame)).is_err() {
                    warn!("session {} write loop already gone", self.id());
                }
            }
            Err(e) => warn!("session {} refused packet: {e}", self.id()),
        }
    }

    /// Request an orderly close. Idempotent; the close hooks fire once the
    /// socket has finished teardown.
    pub fn close(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            debug!("session {} closing", self.id());
            let _ = self.shared.outbound.send(Outbound::Shutdown);
        }
    }

    /// Terminal transition: mark Closed and fire hooks exactly once.
    pub(crate) fn finish_close(&self) {
        let prev = self
            .shared
            .state
            .swap(SessionState::Closed as u8, Ordering::SeqCst);
        if prev == SessionState::Closed as u8 {
            return;
        }
        let hooks: Vec<CloseHook> = self
            .shared
            .close_hooks
            .lock()
            .expect("close hooks poisoned")
            .drain(..)
            .collect();
        for hook in hooks {
            run_close_hook(self, hook);
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

fn run_close_hook(handle: &SessionHandle, hook: CloseHook) {
    if catch_unwind(AssertUnwindSafe(|| hook(handle))).is_err() {
        error!("close hook panicked for session {}", handle.id());
    }
}

fn dispatch(handle: &SessionHandle, packet: Packet) {
    let packet_type = packet.packet_type;
    match handle.shared.handlers.resolve(packet_type) {
        Some(handler) => {
            if catch_unwind(AssertUnwindSafe(|| handler(handle, packet))).is_err() {
                error!(
                    "handler for type {} panicked on session {}",
                    packet_type.as_u8(),
                    handle.id()
                );
            }
        }
        None => debug!(
            "no handler for type {} on session {}",
            packet_type.as_u8(),
            handle.id()
        ),
    }
}

/// Drain every complete frame out of the read buffer.
///
/// HEARTBEAT packets refresh the liveness timestamp and are never forwarded;
/// everything else routes through the handler table. A decode error is fatal
/// for the stream.
fn drain_frames(
    handle: &SessionHandle,
    decoder: &mut PacketDecoder,
    buf: &mut BytesMut,
    last_heartbeat: &mut Instant,
) -> Result<(), WireError> {
    loop {
        match decoder.decode(buf) {
            Ok(Some(packet)) => {
                if packet.packet_type == PacketType::Heartbeat {
                    *last_heartbeat = Instant::now();
                    debug!("session {} heartbeat received", handle.id());
                } else {
                    dispatch(handle, packet);
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                error!("session {} protocol error: {e}", handle.id());
                return Err(e);
            }
        }
    }
}

/// Session I/O task: reads, writes, and heartbeats until close.
pub(crate) async fn run(
    stream: TcpStream,
    handle: SessionHandle,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    config: SessionConfig,
) {
    let peer = handle.remote_addr();
    info!("session {} open ({peer})", handle.id());

    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = PacketDecoder::with_max_payload(config.max_payload);
    let mut read_buf = BytesMut::with_capacity(64 * 1024);
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_heartbeat = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = heartbeat.tick() => {
                if last_heartbeat.elapsed() > config.heartbeat_timeout {
                    warn!("session {} heartbeat timeout ({peer})", handle.id());
                    break;
                }
                let frame = match encode_packet(&Packet::heartbeat(), config.max_payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("session {} heartbeat encode failed: {e}", handle.id());
                        break;
                    }
                };
                if let Err(e) = writer.write_all(&frame).await {
                    warn!("session {} heartbeat write failed: {e}", handle.id());
                    break;
                }
            }

            read = reader.read_buf(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        debug!("session {} EOF ({peer})", handle.id());
                        break;
                    }
                    Ok(_) => {
                        if drain_frames(&handle, &mut decoder, &mut read_buf, &mut last_heartbeat)
                            .is_err()
                        {
                            // Framing corruption is unrecoverable; drop what is buffered.
                            read_buf.clear();
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("session {} read error: {e}", handle.id());
                        break;
                    }
                }
            }

            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!("session {} write error: {e}", handle.id());
                            break;
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        debug!("session {} close requested", handle.id());
                        break;
                    }
                }
            }
        }
    }

    let _ = handle.shared.state.compare_exchange(
        SessionState::Open as u8,
        SessionState::Closing as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    let _ = writer.shutdown().await;
    handle.finish_close();
    info!("session {} closed ({peer})", handle.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_handle() -> (SessionHandle, mpsc::UnboundedReceiver<Outbound>) {
        SessionHandle::new_pair(
            "127.0.0.1:9000".parse().unwrap(),
            Arc::new(HandlerTable::default()),
            &SessionConfig::default(),
        )
    }

    #[test]
    fn test_new_session_is_open_with_unique_id() {
        let (a, _rx_a) = test_handle();
        let (b, _rx_b) = test_handle();
        assert_eq!(a.state(), SessionState::Open);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.remote_port(), 9000);
    }

    #[test]
    fn test_send_queues_encoded_frame() {
        let (handle, mut rx) = test_handle();
        handle.send(Packet::text(7, "ping"));

        match rx.try_recv().unwrap() {
            Outbound::Frame(frame) => {
                let mut buf = BytesMut::from(frame.as_ref());
                let packet = PacketDecoder::new().decode(&mut buf).unwrap().unwrap();
                assert_eq!(packet.sequence, 7);
                assert_eq!(packet.payload.as_ref(), b"ping");
            }
            Outbound::Shutdown => panic!("expected frame"),
        }
    }

    #[test]
    fn test_send_after_close_is_dropped() {
        let (handle, mut rx) = test_handle();
        handle.close();
        assert_eq!(handle.state(), SessionState::Closing);
        handle.send(Packet::text(1, "late"));

        // Only the shutdown command is queued.
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Shutdown));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_hooks_fire_exactly_once() {
        let (handle, _rx) = test_handle();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        handle.on_close(move |_s| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.finish_close();
        handle.finish_close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SessionState::Closed);

        // Late registration runs immediately, still once.
        let counter = Arc::clone(&fired);
        handle.on_close(move |_s| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_prefers_typed_handler_over_fallback() {
        let (handle, _rx) = test_handle();
        let hits = Arc::new(AtomicUsize::new(0));
        let fallback_hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        handle.on_packet(PacketType::Text, move |_s, _p| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&fallback_hits);
        handle.on_fallback(move |_s, _p| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatch(&handle, Packet::text(1, "a"));
        dispatch(&handle, Packet::binary(2, vec![1, 2]));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_poison_dispatch() {
        let (handle, _rx) = test_handle();
        let survived = Arc::new(AtomicUsize::new(0));

        handle.on_packet(PacketType::Text, |_s, _p| panic!("handler bug"));
        let counter = Arc::clone(&survived);
        handle.on_packet(PacketType::Binary, move |_s, _p| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatch(&handle, Packet::text(1, "boom"));
        dispatch(&handle, Packet::binary(2, vec![0]));
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heartbeat_refreshes_without_dispatch() {
        let (handle, _rx) = test_handle();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        handle.on_fallback(move |_s, _p| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut decoder = PacketDecoder::new();
        let mut buf = BytesMut::from(
            encode_packet(&Packet::heartbeat(), DEFAULT_MAX_PAYLOAD)
                .unwrap()
                .as_ref(),
        );
        let mut last_heartbeat = Instant::now() - Duration::from_secs(60);
        drain_frames(&handle, &mut decoder, &mut buf, &mut last_heartbeat).unwrap();

        assert!(last_heartbeat.elapsed() < Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
