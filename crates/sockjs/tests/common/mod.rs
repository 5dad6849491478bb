#![allow(dead_code)]

use std::time::Duration;

use sockjs::{SockJsConfig, SockJsServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Starts a server on an ephemeral port and returns it with its base URL.
pub async fn start(config: SockJsConfig) -> anyhow::Result<(SockJsServer, String)> {
    let server = SockJsServer::serve_with_config(config).await?;
    let base = format!("http://{}", server.config.bind);
    Ok((server, base))
}

/// Collects exactly `len` bytes from a streaming response body.
pub async fn read_exact(response: &mut reqwest::Response, len: usize) -> anyhow::Result<Vec<u8>> {
    let mut collected = Vec::new();
    while collected.len() < len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await??
            .ok_or_else(|| anyhow::anyhow!("body ended after {} bytes", collected.len()))?;
        collected.extend_from_slice(&chunk);
    }
    anyhow::ensure!(
        collected.len() == len,
        "read {} bytes, expected exactly {len}",
        collected.len()
    );
    Ok(collected)
}
