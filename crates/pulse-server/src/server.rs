use std::sync::Arc;

use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::routes::build_router;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub broker: BrokerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9300,
            broker: BrokerConfig::default(),
        }
    }
}

/// Create and start the server on its own router. Applications that
/// want to mount the broker next to their own routes should use
/// `build_router` and serve the merged router themselves.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let broker = Arc::new(Broker::new(config.broker));
    let router = build_router(Arc::clone(&broker));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "pulse server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        broker,
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the serve task alive and
/// exposes the broker for broadcasting.
pub struct ServerHandle {
    pub port: u16,
    pub broker: Arc<Broker>,
    _server: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Target;

    #[tokio::test]
    async fn server_starts_and_serves_script() {
        let config = ServerConfig {
            port: 0, // Random port
            ..Default::default()
        };
        let handle = start(config).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/sse.js/", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn broadcast_with_no_connections_writes_nothing() {
        let handle = start(ServerConfig {
            port: 0,
            ..Default::default()
        })
        .await
        .unwrap();

        let written = handle
            .broker
            .send(Target::All, "noop", &serde_json::json!({}))
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(handle.broker.open_connections(), 0);
    }
}
