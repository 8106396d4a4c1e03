use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pulse_core::{Frame, FrameDecoder, ListenerId, Payload};

use crate::backoff::BackoffPolicy;
use crate::identity::{IdentitySource, PersistentIdentity};
use crate::transport::{HttpTransport, StreamTransport};

const DEFAULT_ENDPOINT: &str = "/api/sse";

pub type Callback = Arc<dyn Fn(Payload) + Send + Sync>;

struct Listener {
    id: ListenerId,
    event_type: String,
    callback: Callback,
}

#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    /// Stream endpoint. Defaults to a well-known path on first use.
    pub endpoint: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No listener ever registered.
    Idle,
    /// Stream open in flight.
    Connecting,
    /// Stream established.
    Connected,
    /// Awaiting a timed retry after an error.
    Backoff,
}

/// Client-side reconnection state machine. Owns a browser identity,
/// a listener table, and a live stream; rebuilds the stream whenever
/// the listener set changes or the stream errors, backing off
/// progressively on repeated failures.
pub struct Subscriber {
    inner: Arc<Inner>,
    driver: tokio::task::JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn StreamTransport>,
    identity: Arc<dyn IdentitySource>,
    listeners: Mutex<Vec<Listener>>,
    /// Last computed endpoint, browser identity included once appended.
    endpoint: Mutex<Option<String>>,
    state: Mutex<ConnectionState>,
    next_listener_id: AtomicU64,
    resync_tx: mpsc::UnboundedSender<()>,
}

impl Subscriber {
    pub fn new(
        config: SubscriberConfig,
        transport: Arc<dyn StreamTransport>,
        identity: Arc<dyn IdentitySource>,
    ) -> Self {
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            transport,
            identity,
            listeners: Mutex::new(Vec::new()),
            endpoint: Mutex::new(config.endpoint),
            state: Mutex::new(ConnectionState::Idle),
            next_listener_id: AtomicU64::new(1),
            resync_tx,
        });
        let driver = tokio::spawn(drive(Arc::clone(&inner), resync_rx, config.backoff));
        Self { inner, driver }
    }

    /// Subscriber over HTTP with a file-backed browser identity.
    pub fn over_http(origin: impl Into<String>, config: SubscriberConfig) -> Self {
        Self::new(
            config,
            Arc::new(HttpTransport::new(origin)),
            Arc::new(PersistentIdentity::new(default_state_dir())),
        )
    }

    /// Register a callback for an event type. Eagerly tears down and
    /// rebuilds the stream; rapid successive calls are not batched,
    /// each one pays a full reconnect.
    pub fn listen(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(Payload) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId::from_raw(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push(Listener {
            id,
            event_type: event_type.into(),
            callback: Arc::new(callback),
        });
        let _ = self.inner.resync_tx.send(());
        id
    }

    /// Remove a registration. Deliberately does not resync: the
    /// stream's type subscriptions stay as they were until the next
    /// `listen` call or error-triggered rebuild.
    pub fn unlisten(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|l| l.id != id);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// The endpoint of the live stream, once computed.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.endpoint.lock().clone()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Reuse the previously computed endpoint, defaulting on first
    /// use, and append the browser identity unless already present.
    /// The appended form is what gets stored, so the identity is
    /// computed at most once per subscriber even in ephemeral mode.
    fn compute_endpoint(&self) -> String {
        let mut stored = self.endpoint.lock();
        let mut url = stored
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !url.contains("browserId=") {
            let sep = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{sep}browserId={}", self.identity.browser_id());
        }
        *stored = Some(url.clone());
        url
    }

    fn distinct_event_types(&self) -> HashSet<String> {
        self.listeners
            .lock()
            .iter()
            .map(|l| l.event_type.clone())
            .collect()
    }

    /// Invoke every callback registered for the frame's type, in
    /// registration order. Callbacks are collected first so none of
    /// them runs under the table lock (a callback may call `listen`).
    fn dispatch(&self, frame: &Frame) {
        let payload = frame.payload();
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.event_type == frame.event)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(payload.clone());
        }
    }
}

enum StreamExit {
    /// A listener registration asked for a rebuild.
    Resync,
    /// The stream failed or ended; retry after backoff.
    Retry,
    /// The subscriber is gone.
    Shutdown,
}

/// Driver task: the single loop owning connect, read, dispatch and
/// backoff. Sequential by construction, so at most one retry timer is
/// ever outstanding, and a resync request cancels it by preempting the
/// sleep.
async fn drive(
    inner: Arc<Inner>,
    mut resync_rx: mpsc::UnboundedReceiver<()>,
    mut backoff: BackoffPolicy,
) {
    // Idle until the first listener registration.
    if resync_rx.recv().await.is_none() {
        return;
    }

    loop {
        match run_stream(&inner, &mut resync_rx, &mut backoff).await {
            StreamExit::Resync => continue,
            StreamExit::Shutdown => return,
            StreamExit::Retry => {
                inner.set_state(ConnectionState::Backoff);
                let delay = backoff.next_delay();
                tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    msg = resync_rx.recv() => {
                        if msg.is_none() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// One full stream attempt: open, then read until a resync request,
/// an error, or end-of-stream. The subscribed type set is snapshotted
/// at open; table mutations take effect on the next rebuild.
async fn run_stream(
    inner: &Arc<Inner>,
    resync_rx: &mut mpsc::UnboundedReceiver<()>,
    backoff: &mut BackoffPolicy,
) -> StreamExit {
    let endpoint = inner.compute_endpoint();
    let subscribed = inner.distinct_event_types();
    inner.set_state(ConnectionState::Connecting);
    tracing::debug!(endpoint = %endpoint, types = subscribed.len(), "opening stream");

    let mut stream = tokio::select! {
        result = inner.transport.open(&endpoint) => match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, kind = e.error_kind(), "stream open failed");
                return StreamExit::Retry;
            }
        },
        msg = resync_rx.recv() => {
            return if msg.is_some() { StreamExit::Resync } else { StreamExit::Shutdown };
        }
    };

    inner.set_state(ConnectionState::Connected);
    let mut decoder = FrameDecoder::new();

    loop {
        tokio::select! {
            msg = resync_rx.recv() => {
                return if msg.is_some() { StreamExit::Resync } else { StreamExit::Shutdown };
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for frame in decoder.push(&text) {
                        if subscribed.contains(&frame.event) {
                            inner.dispatch(&frame);
                            backoff.reset();
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, kind = e.error_kind(), "stream error");
                    return StreamExit::Retry;
                }
                None => {
                    for frame in decoder.finish() {
                        if subscribed.contains(&frame.event) {
                            inner.dispatch(&frame);
                            backoff.reset();
                        }
                    }
                    tracing::debug!("stream closed by server");
                    return StreamExit::Retry;
                }
            }
        }
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join(".pulse")
}
