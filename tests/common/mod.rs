//! Shared utilities for integration tests.

use std::time::Duration;

use froovo::{RunningServer, Server, ServerConfig};

/// Config bound to loopback, everything else default.
pub fn local_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".to_string();
    config
}

/// Register routes with `setup` and listen on an ephemeral port.
pub async fn start_server<F>(setup: F) -> RunningServer
where
    F: FnOnce(&mut Server),
{
    start_server_with(local_config(), setup).await
}

pub async fn start_server_with<F>(config: ServerConfig, setup: F) -> RunningServer
where
    F: FnOnce(&mut Server),
{
    let mut server = Server::new(config);
    setup(&mut server);
    server.listen(0).await.expect("server failed to start")
}

pub fn url(server: &RunningServer, path: &str) -> String {
    format!("http://{}{}", server.local_addr(), path)
}

/// Poll `condition` until it holds or a second passes.
#[allow(dead_code)]
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
