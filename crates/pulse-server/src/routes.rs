use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use pulse_core::{BrowserId, SessionId};

use crate::broker::Broker;
use crate::registry::{enforce_single_session, Connection, RequestContext};

/// Embedded browser client, served verbatim at the script endpoint.
const CLIENT_SCRIPT: &str = include_str!("../assets/pulse.js");

/// Session identity populated by upstream middleware. The broker never
/// creates one; its absence is not an error.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
}

/// Extracts the optional session from request extensions.
struct MaybeSession(Option<Session>);

impl<S> axum::extract::FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(parts.extensions.get::<Session>().cloned()))
    }
}

/// Build the broker's router: the script endpoint, the stream endpoint
/// (with and without trailing slash, plus everything under the prefix),
/// and nothing else. Merge into a surrounding router to let unclaimed
/// paths fall through to the rest of the application.
pub fn build_router(broker: Arc<Broker>) -> Router {
    let endpoint = broker.config().endpoint.clone();
    let script = broker.config().script.clone();

    let mut router = Router::new()
        .route(&script, get(script_handler))
        .route(&endpoint, get(stream_handler))
        .route(&format!("{endpoint}{{*rest}}"), get(stream_handler));

    let endpoint_base = endpoint.trim_end_matches('/');
    if !endpoint_base.is_empty() {
        router = router.route(endpoint_base, get(stream_handler));
    }
    let script_base = script.trim_end_matches('/');
    if !script_base.is_empty() {
        router = router.route(script_base, get(script_handler));
    }

    router.layer(CorsLayer::permissive()).with_state(broker)
}

async fn script_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        CLIENT_SCRIPT,
    )
}

/// Stream entry point: evict stale duplicates, register the connection,
/// and hold the response open until the client goes away or is evicted.
async fn stream_handler(
    State(broker): State<Arc<Broker>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    MaybeSession(session): MaybeSession,
) -> Response {
    let Some(browser_id) = params.get("browserId") else {
        tracing::warn!(path = uri.path(), "stream request without browserId");
        return (StatusCode::BAD_REQUEST, "missing browserId query parameter").into_response();
    };

    let context = RequestContext {
        path: uri.path().to_string(),
        browser_id: BrowserId::from_raw(browser_id.clone()),
        session_id: session.map(|s| s.id),
        query: params,
    };

    // Eviction runs before the newcomer is registered, so it can never
    // evict itself.
    let evicted = enforce_single_session(broker.registry(), &context);
    if evicted > 0 {
        tracing::info!(browser_id = %context.browser_id, evicted, "stale streams closed");
    }

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let shutdown = CancellationToken::new();
    let conn = Arc::new(Connection::new(context, tx, shutdown.clone()));
    broker.registry().add(Arc::clone(&conn));
    tracing::info!(
        browser_id = %conn.context.browser_id,
        open = broker.open_connections(),
        "stream connected"
    );

    // Dropped when the response body goes away, whichever way the
    // stream ends; registry removal is idempotent.
    let guard = RemoveOnClose {
        broker: Arc::clone(&broker),
        conn,
    };

    let body = UnboundedReceiverStream::new(rx)
        .take_until(shutdown.cancelled_owned())
        .map(move |frame| {
            let _ = &guard;
            Ok::<_, Infallible>(Bytes::from(frame))
        });

    (
        [
            (header::CONNECTION, "keep-alive"),
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

struct RemoveOnClose {
    broker: Arc<Broker>,
    conn: Arc<Connection>,
}

impl Drop for RemoveOnClose {
    fn drop(&mut self) {
        self.broker.registry().remove(&self.conn);
        tracing::info!(
            browser_id = %self.conn.context.browser_id,
            open = self.broker.open_connections(),
            "stream closed"
        );
    }
}
