use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pulse_core::{BrowserId, SessionId};

/// Read-only view of the request that opened a stream. Broadcast
/// predicates filter over this.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub path: String,
    pub browser_id: BrowserId,
    /// Populated by upstream session middleware; absent when none is
    /// mounted. Absence disables eviction and session counting.
    pub session_id: Option<SessionId>,
    pub query: HashMap<String, String>,
}

/// One live stream. Created when a stream request arrives, destroyed
/// exactly once — by eviction or by the transport closing.
pub struct Connection {
    pub context: RequestContext,
    frames: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        context: RequestContext,
        frames: mpsc::UnboundedSender<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context,
            frames,
            shutdown,
        }
    }

    /// Best-effort frame write. A send to a transport whose peer is
    /// already gone fails silently; the close path does the cleanup.
    pub fn write(&self, frame: String) {
        if self.frames.send(frame).is_err() {
            tracing::debug!(browser_id = %self.context.browser_id, "write to closed transport dropped");
        }
    }

    /// Terminate the stream. The response body ends, which removes the
    /// connection from the registry through the normal close path.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Ordered set of live connections. Sole owner of the collection; all
/// membership changes go through `add`/`remove`.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<Connection>) {
        self.inner.lock().push(conn);
    }

    /// Remove by identity, not value equality. Idempotent: removing an
    /// absent connection is a no-op.
    pub fn remove(&self, conn: &Arc<Connection>) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.iter().position(|c| Arc::ptr_eq(c, conn)) {
            inner.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of distinct non-empty session identifiers currently
    /// represented. Sessionless connections are not counted.
    pub fn distinct_session_count(&self) -> usize {
        let inner = self.inner.lock();
        let ids: HashSet<&str> = inner
            .iter()
            .filter_map(|c| c.context.session_id.as_ref())
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        ids.len()
    }

    /// Point-in-time view in registration order. Iterating a snapshot
    /// tolerates concurrent removal without skipped or doubled visits.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().clone()
    }
}

/// Session eviction policy: a browser identity represents one operator,
/// so when the same browser reconnects under a new session, streams
/// still held by the old session are terminated. Invoked before the
/// incoming connection is registered. Returns how many were closed.
///
/// Sessionless connections never evict and are never evicted.
pub fn enforce_single_session(registry: &ConnectionRegistry, incoming: &RequestContext) -> usize {
    let Some(new_session) = &incoming.session_id else {
        return 0;
    };

    let mut evicted = 0;
    for conn in registry.snapshot() {
        let Some(session) = &conn.context.session_id else {
            continue;
        };
        if conn.context.browser_id == incoming.browser_id && session != new_session {
            tracing::info!(
                browser_id = %incoming.browser_id,
                stale_session = %session,
                "evicting stale session stream"
            );
            conn.close();
            evicted += 1;
        }
    }
    evicted
}
