//! Inbound connection manager.
//!
//! A [`Server`] owns one single-worker tokio runtime, an accept loop, and a
//! registry of live sessions keyed by session id. Each accepted connection
//! gets its own handler table; the connect handler wires per-session packet
//! handlers before the first byte is read.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use netframe_wire::Packet;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::NetError;
use crate::session::{self, HandlerTable, SessionConfig, SessionHandle, SessionState};

type ConnectHandler = Arc<dyn Fn(&SessionHandle) + Send + Sync>;

struct ServerInner {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    connect_handler: RwLock<Option<ConnectHandler>>,
    listening: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

/// Accepts inbound TCP sessions and tracks them until they close.
pub struct Server {
    runtime: Runtime,
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server with its own reactor runtime.
    pub fn new(config: SessionConfig) -> Result<Self, NetError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("netframe-server")
            .enable_all()
            .build()
            .map_err(NetError::Runtime)?;

        Ok(Self {
            runtime,
            inner: Arc::new(ServerInner {
                config,
                sessions: Mutex::new(HashMap::new()),
                connect_handler: RwLock::new(None),
                listening: AtomicBool::new(false),
                shutdown: Mutex::new(None),
            }),
        })
    }

    /// Register the handler invoked for every accepted session.
    ///
    /// Runs on the reactor thread before any packet from that session is
    /// read, so handlers registered inside it never miss a packet.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&SessionHandle) + Send + Sync + 'static,
    {
        *self
            .inner
            .connect_handler
            .write()
            .expect("connect handler poisoned") = Some(Arc::new(handler));
    }

    /// Bind and start accepting connections.
    ///
    /// Port 0 picks an ephemeral port; the bound address is returned either
    /// way. Bind failures surface synchronously.
    pub fn listen(&self, host: &str, port: u16) -> Result<SocketAddr, NetError> {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyListening);
        }

        let addr = format!("{host}:{port}");
        let listener = match self.runtime.block_on(TcpListener::bind(&addr)) {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.listening.store(false, Ordering::SeqCst);
                return Err(NetError::Bind(e));
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                self.inner.listening.store(false, Ordering::SeqCst);
                return Err(NetError::Bind(e));
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.inner.shutdown.lock().expect("server shutdown poisoned") = Some(shutdown_tx);

        info!("listening on {local_addr}");
        let inner = Arc::clone(&self.inner);
        self.runtime.spawn(accept_loop(inner, listener, shutdown_rx));
        Ok(local_addr)
    }

    /// Stop accepting new connections. Existing sessions keep running.
    pub fn stop_listening(&self) {
        let sender = self
            .inner
            .shutdown
            .lock()
            .expect("server shutdown poisoned")
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Whether the accept loop is running.
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().expect("server sessions poisoned").len()
    }

    /// Snapshot of all tracked sessions.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.inner
            .sessions
            .lock()
            .expect("server sessions poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Send a packet to one session by id.
    pub fn send_to(&self, session_id: &str, packet: Packet) -> Result<(), NetError> {
        let session = self
            .inner
            .sessions
            .lock()
            .expect("server sessions poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| NetError::SessionNotFound(session_id.to_string()))?;
        session.send(packet);
        Ok(())
    }

    /// Send a packet to every open session, skipping ones mid-close.
    ///
    /// Returns the number of sessions the packet was queued for.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        // Snapshot first so no session lock is held while queueing writes.
        let sessions = self.sessions();
        let mut sent = 0;
        for session in sessions {
            if session.state() == SessionState::Open {
                session.send(packet.clone());
                sent += 1;
            }
        }
        debug!("broadcast queued for {sent} sessions");
        sent
    }

    /// Stop listening, close every session, and tear down the runtime.
    pub fn stop(self) {
        self.stop_listening();
        for session in self.sessions() {
            session.close();
        }
        self.runtime.shutdown_timeout(Duration::from_secs(5));
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listening", &self.is_listening())
            .field("sessions", &self.session_count())
            .finish()
    }
}

async fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => admit(&inner, stream, peer),
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
    inner.listening.store(false, Ordering::SeqCst);
}

fn admit(inner: &Arc<ServerInner>, stream: TcpStream, peer: SocketAddr) {
    // Each session gets its own handler table so connect handlers can wire
    // per-session behavior without affecting other connections.
    let handlers = Arc::new(HandlerTable::default());
    let (handle, outbound_rx) = SessionHandle::new_pair(peer, handlers, &inner.config);

    inner
        .sessions
        .lock()
        .expect("server sessions poisoned")
        .insert(handle.id().to_string(), handle.clone());
    info!("accepted session {} from {peer}", handle.id());

    let hook_inner = Arc::clone(inner);
    handle.on_close(move |session| {
        hook_inner
            .sessions
            .lock()
            .expect("server sessions poisoned")
            .remove(session.id());
        debug!("session {} removed from registry", session.id());
    });

    let connect_handler = inner
        .connect_handler
        .read()
        .expect("connect handler poisoned")
        .clone();
    if let Some(handler) = connect_handler {
        if catch_unwind(AssertUnwindSafe(|| handler(&handle))).is_err() {
            error!("connect handler panicked for session {}", handle.id());
        }
    }

    tokio::spawn(session::run(
        stream,
        handle,
        outbound_rx,
        inner.config.clone(),
    ));
}
