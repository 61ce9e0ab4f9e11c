//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use forward_proxy::{Proxy, ProxyConfig, Shutdown};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A proxy running on its own thread.
pub struct RunningProxy {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    handle: Option<JoinHandle<()>>,
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = false;
    config
}

/// Start the proxy on an ephemeral port.
pub fn start_proxy(config: ProxyConfig) -> RunningProxy {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let mut proxy = Proxy::bind(config).unwrap();
        tx.send((proxy.local_addr().unwrap(), proxy.shutdown_handle()))
            .unwrap();
        proxy.run().unwrap();
    });
    let (addr, shutdown) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    RunningProxy {
        addr,
        shutdown,
        handle: Some(handle),
    }
}

/// What the mock origin saw.
#[derive(Clone, Default)]
pub struct OriginLog {
    pub requests: Arc<Mutex<Vec<String>>>,
    pub connections: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl OriginLog {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a mock origin answering every request with `response`.
///
/// Requests (head and body) are recorded. The connection is kept open for
/// further requests unless the response says `Connection: close` or is
/// delimited by the close itself.
pub async fn start_origin(response: &'static str) -> (SocketAddr, OriginLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = OriginLog::default();
    let accept_log = log.clone();
    let lower = response.to_ascii_lowercase();
    let closes = lower.contains("connection: close")
        || !(lower.contains("content-length") || lower.contains("transfer-encoding"));

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            accept_log.connections.fetch_add(1, Ordering::SeqCst);
            let log = accept_log.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                while let Some(request) = read_message(&mut reader).await {
                    log.requests.lock().unwrap().push(request);
                    if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                    if closes {
                        let _ = reader.get_mut().shutdown().await;
                        break;
                    }
                }
            });
        }
    });

    (addr, log)
}

/// Read one HTTP message framed by `Content-Length` (or head only).
pub async fn read_message(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut message = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
        let end = line == "\r\n";
        message.push_str(&line);
        if end {
            break;
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    message.push_str(&String::from_utf8_lossy(&body));
    Some(message)
}

/// Send raw bytes through the proxy and read until it closes the connection.
#[allow(dead_code)]
pub async fn exchange(proxy: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    // a reset after the answer still leaves the answer in `response`
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection");
    String::from_utf8_lossy(&response).into_owned()
}
