use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use pulse_core::encode_frame;

use crate::config::BrokerConfig;
use crate::registry::{ConnectionRegistry, RequestContext};

/// Predicate over a connection's request context, deciding whether a
/// broadcast reaches it.
pub type Predicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Broadcast selection: everyone, or the subset a predicate accepts.
#[derive(Clone)]
pub enum Target {
    All,
    Filter(Predicate),
}

impl Target {
    pub fn filter(f: impl Fn(&RequestContext) -> bool + Send + Sync + 'static) -> Self {
        Target::Filter(Arc::new(f))
    }

    /// Parse a string-typed target. Anything other than the literal
    /// `"all"` is rejected — this is the broker's only caller-facing
    /// error.
    pub fn parse(s: &str) -> Result<Self, BrokerError> {
        if s == "all" {
            Ok(Target::All)
        } else {
            Err(BrokerError::InvalidTarget(s.to_string()))
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("Target::All"),
            Target::Filter(_) => f.write_str("Target::Filter(..)"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("send target must be \"all\" or a filter over the request context, got {0:?}")]
    InvalidTarget(String),
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Public face of the server side: owns the registry, applies the
/// eviction policy on connect (see `routes`), and fans encoded frames
/// out to filtered subsets of connections.
pub struct Broker {
    config: BrokerConfig,
    registry: ConnectionRegistry,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config: config.normalized(),
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Broadcast one event frame to every connection the target
    /// selects, in registration order. Delivery is best-effort: a write
    /// to a transport whose peer already disconnected is dropped.
    /// Returns the number of transports written to.
    pub fn send<T: Serialize>(
        &self,
        target: Target,
        event_type: &str,
        payload: &T,
    ) -> Result<usize, BrokerError> {
        self.send_filtered(target, event_type, payload, None)
    }

    /// Alternate calling convention with a separate filter argument.
    /// Exactly one selection mechanism is honored: a predicate-valued
    /// target takes precedence and the extra filter is ignored.
    pub fn send_filtered<T: Serialize>(
        &self,
        target: Target,
        event_type: &str,
        payload: &T,
        filter: Option<Predicate>,
    ) -> Result<usize, BrokerError> {
        let predicate: Predicate = match target {
            Target::Filter(f) => f,
            Target::All => filter.unwrap_or_else(|| Arc::new(|_| true)),
        };

        let json = serde_json::to_string(payload)?;
        let frame = encode_frame(event_type, &json);

        let mut written = 0;
        for conn in self.registry.snapshot() {
            if predicate(&conn.context) {
                conn.write(frame.clone());
                written += 1;
            }
        }

        tracing::debug!(event_type, written, "broadcast");
        Ok(written)
    }

    /// Current registry size.
    pub fn open_connections(&self) -> usize {
        self.registry.len()
    }

    /// Current distinct session count.
    pub fn open_sessions(&self) -> usize {
        self.registry.distinct_session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use pulse_core::{BrowserId, SessionId};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::registry::Connection;

    fn attach(
        broker: &Broker,
        browser: &str,
        session: Option<&str>,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        broker.registry().add(Arc::new(Connection::new(
            RequestContext {
                path: "/sse/".to_string(),
                browser_id: BrowserId::from_raw(browser),
                session_id: session.map(SessionId::from_raw),
                query: HashMap::new(),
            },
            tx,
            CancellationToken::new(),
        )));
        rx
    }

    #[test]
    fn send_all_reaches_every_connection_with_exact_frame() {
        let broker = Broker::new(BrokerConfig::default());
        let mut receivers = vec![
            attach(&broker, "a", None),
            attach(&broker, "b", None),
            attach(&broker, "c", None),
        ];

        let written = broker
            .send(Target::All, "ping", &serde_json::json!({"n": 1}))
            .unwrap();
        assert_eq!(written, 3);

        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), "event: ping\ndata: {\"n\":1}\n\n");
        }
    }

    #[test]
    fn send_with_predicate_filters() {
        let broker = Broker::new(BrokerConfig::default());
        let mut a = attach(&broker, "a", None);
        let mut b = attach(&broker, "b", None);

        let written = broker
            .send(
                Target::filter(|ctx| ctx.browser_id.as_str() == "b"),
                "x",
                &serde_json::json!(1),
            )
            .unwrap();
        assert_eq!(written, 1);
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap(), "event: x\ndata: 1\n\n");
    }

    #[test]
    fn predicate_target_wins_over_separate_filter() {
        let broker = Broker::new(BrokerConfig::default());
        let mut a = attach(&broker, "a", None);
        let mut b = attach(&broker, "b", None);

        let ignored: Predicate = Arc::new(|_| false);
        let written = broker
            .send_filtered(
                Target::filter(|ctx| ctx.browser_id.as_str() == "a"),
                "x",
                &serde_json::json!(1),
                Some(ignored),
            )
            .unwrap();
        assert_eq!(written, 1);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn separate_filter_applies_to_all_target() {
        let broker = Broker::new(BrokerConfig::default());
        let mut a = attach(&broker, "a", Some("s1"));
        let mut b = attach(&broker, "b", None);

        let only_sessions: Predicate = Arc::new(|ctx| ctx.session_id.is_some());
        let written = broker
            .send_filtered(Target::All, "x", &serde_json::json!(1), Some(only_sessions))
            .unwrap();
        assert_eq!(written, 1);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn invalid_string_target_is_rejected() {
        assert!(matches!(
            Target::parse("everyone"),
            Err(BrokerError::InvalidTarget(_))
        ));
        assert!(matches!(Target::parse("all"), Ok(Target::All)));
    }

    #[test]
    fn frames_are_written_in_registration_order() {
        let broker = Broker::new(BrokerConfig::default());
        let _a = attach(&broker, "a", None);
        let _b = attach(&broker, "b", None);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let probe = Arc::clone(&seen);
        broker
            .send(
                Target::filter(move |ctx| {
                    probe.lock().push(ctx.browser_id.to_string());
                    true
                }),
                "x",
                &serde_json::json!(1),
            )
            .unwrap();
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn counters_track_registry() {
        let broker = Broker::new(BrokerConfig::default());
        let _a = attach(&broker, "a", Some("s1"));
        let _b = attach(&broker, "b", Some("s1"));
        let _c = attach(&broker, "c", None);
        assert_eq!(broker.open_connections(), 3);
        assert_eq!(broker.open_sessions(), 1);
    }
}
