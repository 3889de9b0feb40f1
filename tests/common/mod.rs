//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use siteconf::config::schema::{ConfigurationMode, ServiceConfig};
use siteconf::lifecycle::startup::{init_server, SiteConf};
use siteconf::site::source::MemorySource;
use siteconf::site::ValidatorRegistry;

/// Settings for an in-process server role: fast polling, no escape hatch.
pub fn server_settings() -> ServiceConfig {
    let mut settings = ServiceConfig::default();
    settings.mode = ConfigurationMode::Server;
    settings.escape_hatch.enabled = false;
    settings.updates.max_jitter_ms = 20;
    settings.updates.deadlock_timeout_secs = Some(5);
    settings.admin.api_key = "test-key".to_string();
    settings
}

/// A server role backed by an in-memory source.
pub fn start_server(site: &str, registry: ValidatorRegistry) -> (SiteConf, Arc<MemorySource>) {
    let source = Arc::new(MemorySource::new(site));
    let conf = init_server(source.clone(), &server_settings(), registry);
    (conf, source)
}

/// Poll `cond` until it holds, failing the test after `timeout`.
pub async fn wait_until<F>(timeout: Duration, mut cond: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Start a programmable HTTP backend on an ephemeral port.
///
/// Every connection gets the `(status, body)` returned by `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
