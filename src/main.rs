use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use pulse_server::{BrokerConfig, ServerConfig, Target};

#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Server-push event broadcast hub")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 9300)]
    port: u16,

    /// Stream endpoint prefix.
    #[arg(long, default_value = "/sse/")]
    endpoint: String,

    /// Path serving the embedded browser client.
    #[arg(long, default_value = "/sse.js/")]
    script: String,

    /// Broadcast a demo `tick` event at this interval in seconds;
    /// 0 disables.
    #[arg(long, default_value_t = 0)]
    tick: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ServerConfig {
        port: cli.port,
        broker: BrokerConfig {
            endpoint: cli.endpoint,
            script: cli.script,
        },
    };

    let handle = pulse_server::start(config)
        .await
        .expect("failed to start server");
    tracing::info!(port = handle.port, "pulse ready");

    if cli.tick > 0 {
        let broker = Arc::clone(&handle.broker);
        let period = Duration::from_secs(cli.tick);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let mut seq: u64 = 0;
            loop {
                interval.tick().await;
                seq += 1;
                if let Err(e) = broker.send(Target::All, "tick", &serde_json::json!({ "seq": seq })) {
                    tracing::warn!(error = %e, "tick broadcast failed");
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("shutting down");
}
