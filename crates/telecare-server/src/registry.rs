//! Connection registry: which live socket speaks for which user.
//!
//! The map is owned by a single actor task. Callers hold a cloneable
//! [`Registry`] handle and talk to the actor with typed commands, so the map
//! itself is never shared. One socket per user: a second `bind` for the same
//! user replaces the first (last writer wins).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use telecare_shared::protocol::ServerEnvelope;
use telecare_shared::types::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique socket identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Sending side of one socket's outbound queue. The socket's writer task
/// owns the receiver; once it exits the handle reports closed.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame without waiting. A full queue drops the frame
    /// rather than stalling the dispatching connection.
    pub fn send_text(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn = %self.id, "Outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn = %self.id, "Outbound queue closed, dropping frame");
                false
            }
        }
    }

    pub fn send_envelope(&self, envelope: &ServerEnvelope) -> bool {
        match envelope.to_json() {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!(conn = %self.id, error = %e, "Failed to encode envelope");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Map state (owned by the actor)
// ---------------------------------------------------------------------------

/// Bidirectional index so that both `lookup` and `unbind` are O(1).
#[derive(Default)]
struct RegistryState {
    by_user: HashMap<UserId, ConnectionHandle>,
    by_conn: HashMap<ConnectionId, UserId>,
}

impl RegistryState {
    fn bind(&mut self, user: UserId, handle: ConnectionHandle) {
        let conn = handle.id();

        // The socket re-authenticated as someone else: release the old identity.
        if let Some(previous_user) = self.by_conn.insert(conn, user) {
            if previous_user != user && self.owner(previous_user) == Some(conn) {
                self.by_user.remove(&previous_user);
            }
        }

        if let Some(replaced) = self.by_user.insert(user, handle) {
            if replaced.id() != conn {
                self.by_conn.remove(&replaced.id());
                info!(user = %user, old = %replaced.id(), new = %conn, "Replaced existing binding");
            }
        }
    }

    fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.by_user.get(&user).cloned()
    }

    /// Remove whatever `conn` is bound to. A binding that has since moved to
    /// another socket is left alone.
    fn unbind(&mut self, conn: ConnectionId) -> Option<UserId> {
        let user = self.by_conn.remove(&conn)?;
        if self.owner(user) == Some(conn) {
            self.by_user.remove(&user);
            Some(user)
        } else {
            None
        }
    }

    fn owner(&self, user: UserId) -> Option<ConnectionId> {
        self.by_user.get(&user).map(ConnectionHandle::id)
    }

    fn len(&self) -> usize {
        self.by_user.len()
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum RegistryCommand {
    Bind {
        user: UserId,
        handle: ConnectionHandle,
        done: oneshot::Sender<()>,
    },
    Lookup {
        user: UserId,
        reply: oneshot::Sender<Option<ConnectionHandle>>,
    },
    Unbind {
        conn: ConnectionId,
        reply: oneshot::Sender<Option<UserId>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the registry actor. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl Registry {
    /// Spawn the actor on the current tokio runtime. It stops once every
    /// handle has been dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RegistryCommand>();

        tokio::spawn(async move {
            let mut state = RegistryState::default();
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    RegistryCommand::Bind { user, handle, done } => {
                        debug!(user = %user, conn = %handle.id(), "Binding user");
                        state.bind(user, handle);
                        let _ = done.send(());
                    }
                    RegistryCommand::Lookup { user, reply } => {
                        let _ = reply.send(state.lookup(user));
                    }
                    RegistryCommand::Unbind { conn, reply } => {
                        let removed = state.unbind(conn);
                        if let Some(user) = removed {
                            debug!(user = %user, conn = %conn, "Unbound user");
                        }
                        let _ = reply.send(removed);
                    }
                    RegistryCommand::Len { reply } => {
                        let _ = reply.send(state.len());
                    }
                }
            }
            debug!("Registry actor stopped");
        });

        Self { tx }
    }

    /// Register `handle` as the socket for `user`, replacing any previous one.
    /// Resolves once the binding is visible to subsequent lookups.
    pub async fn bind(&self, user: UserId, handle: ConnectionHandle) {
        let (done, wait) = oneshot::channel();
        if self
            .tx
            .send(RegistryCommand::Bind { user, handle, done })
            .is_ok()
        {
            let _ = wait.await;
        }
    }

    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Lookup { user, reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Called when a socket closes. Returns the user that was unbound, if the
    /// socket still owned a binding.
    pub async fn unbind(&self, conn: ConnectionId) -> Option<UserId> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RegistryCommand::Unbind { conn, reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Number of bound users.
    pub async fn len(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::Len { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
