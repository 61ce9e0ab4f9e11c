//! End-to-end request flows through a running proxy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

mod common;

use common::{exchange, read_message, start_origin, start_proxy, test_config};

const HELLO_CLOSE: &str =
    "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello";

#[tokio::test]
async fn absolute_uri_request_is_forwarded() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let proxy = start_proxy(test_config());

    let request = format!(
        "GET http://{origin}/hello HTTP/1.1\r\nHost: {origin}\r\nProxy-Connection: close\r\nAccept: */*\r\n\r\n"
    );
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
    assert!(response.contains("content-length: 5\r\n"));
    assert!(response.ends_with("\r\n\r\nhello"));

    let seen = log.requests();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with(&format!("GET http://{origin}/hello HTTP/1.1\r\nConnection: close\r\n")));
    assert!(!seen[0].to_ascii_lowercase().contains("proxy-connection"));
    assert_eq!(seen[0].to_ascii_lowercase().matches("connection:").count(), 1);
    assert!(seen[0].contains("accept: */*\r\n"));
}

#[tokio::test]
async fn host_header_addresses_relative_request() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let proxy = start_proxy(test_config());

    let request = format!("GET /path?q=1 HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(log.requests()[0].starts_with("GET /path?q=1 HTTP/1.1\r\n"));
}

#[tokio::test]
async fn request_body_is_forwarded() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let proxy = start_proxy(test_config());

    let request = format!(
        "POST http://{origin}/submit HTTP/1.1\r\nHost: {origin}\r\nContent-Length: 11\r\nConnection: close\r\n\r\nhello=world"
    );
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    let seen = log.requests();
    assert!(seen[0].contains("content-length: 11\r\n"));
    assert!(seen[0].ends_with("\r\n\r\nhello=world"));
}

#[tokio::test]
async fn missing_host_is_400() {
    let proxy = start_proxy(test_config());
    let response = exchange(proxy.addr, b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));
}

#[tokio::test]
async fn unknown_method_is_405() {
    let proxy = start_proxy(test_config());
    let response = exchange(proxy.addr, b"BREW http://pot.local/ HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

    let response = exchange(proxy.addr, b"CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
}

#[tokio::test]
async fn post_without_length_is_411() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let proxy = start_proxy(test_config());

    let request = format!("POST http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 411 Length Required\r\n"));
    assert!(log.requests().is_empty());
}

#[tokio::test]
async fn unreachable_origin_is_502() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let proxy = start_proxy(test_config());
    let request = format!("GET http://{addr}/ HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[tokio::test]
async fn origin_closing_without_response_is_502() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let mut reader = BufReader::new(socket);
            let _ = read_message(&mut reader).await;
            let _ = reader.get_mut().shutdown().await;
        }
    });

    let proxy = start_proxy(test_config());
    let request = format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[tokio::test]
async fn close_delimited_response_is_relayed_until_eof() {
    let (origin, _log) = start_origin("HTTP/1.0 200 OK\r\nServer: old\r\n\r\nstreamed until close").await;
    let proxy = start_proxy(test_config());

    let request = format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(response.contains("server: old\r\n"));
    assert!(response.ends_with("\r\n\r\nstreamed until close"));
}

#[tokio::test]
async fn chunked_response_is_relayed_verbatim() {
    let (origin, _log) = start_origin(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    )
    .await;
    let proxy = start_proxy(test_config());

    let request = format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.contains("transfer-encoding: chunked\r\n"));
    assert!(response.ends_with("\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn keep_alive_client_sends_sequential_requests() {
    let (origin, log) = start_origin("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy = start_proxy(test_config());

    let stream = TcpStream::connect(proxy.addr).await.unwrap();
    let mut client = BufReader::new(stream);
    for path in ["/one", "/two"] {
        let request = format!("GET http://{origin}{path} HTTP/1.1\r\nHost: {origin}\r\n\r\n");
        client.get_mut().write_all(request.as_bytes()).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), read_message(&mut client))
            .await
            .unwrap()
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n"));
        assert!(response.ends_with("ok"));
    }

    let seen = log.requests();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].starts_with(&format!("GET http://{origin}/two HTTP/1.1\r\n")));
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let (origin, log) = start_origin("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
    let proxy = start_proxy(test_config());

    let request = format!(
        "GET http://{origin}/a HTTP/1.1\r\nHost: {origin}\r\n\r\nGET http://{origin}/b HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n"
    );
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert_eq!(response.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    let seen = log.requests();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("/a HTTP/1.1"));
    assert!(seen[1].contains("/b HTTP/1.1"));
}

#[tokio::test]
async fn idle_upstream_is_reused_from_pool() {
    let (origin, log) = start_origin(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok",
    )
    .await;
    let mut config = test_config();
    config.pool.upstream_keep_alive = true;
    let proxy = start_proxy(config);

    for _ in 0..3 {
        let request =
            format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n");
        let response = exchange(proxy.addr, request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\nConnection: close\r\n"));
    }

    assert_eq!(log.connections(), 1);
    let seen = log.requests();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|r| r.contains("\r\nConnection: keep-alive\r\n")));
}

#[tokio::test]
async fn pooling_disabled_opens_a_connection_per_request() {
    let (origin, log) = start_origin(
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok",
    )
    .await;
    let mut config = test_config();
    config.pool.enabled = false;
    config.pool.upstream_keep_alive = true;
    let proxy = start_proxy(config);

    for _ in 0..2 {
        let request =
            format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n");
        exchange(proxy.addr, request.as_bytes()).await;
    }

    assert_eq!(log.connections(), 2);
}

#[tokio::test]
async fn half_closed_client_still_gets_response() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let proxy = start_proxy(test_config());

    let body = "a".repeat(200_000);
    let request = format!(
        "POST http://{origin}/upload HTTP/1.1\r\nHost: {origin}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("hello"));

    let seen = log.requests();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].ends_with(&format!("\r\n\r\n{body}")));
}

#[tokio::test]
async fn half_close_inside_request_head_is_400() {
    let proxy = start_proxy(test_config());

    let mut stream = TcpStream::connect(proxy.addr).await.unwrap();
    stream
        .write_all(b"GET /partial HTTP/1.1\r\nAccept: */*\r\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn head_filling_buffer_before_host_is_431() {
    let mut config = test_config();
    config.buffers.processed_size = 512;
    let proxy = start_proxy(config);

    let mut request = String::from("GET / HTTP/1.1\r\n");
    for i in 0..40 {
        request.push_str(&format!("X-Filler-{i}: {}\r\n", "f".repeat(40)));
    }
    request.push_str("\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
}

#[tokio::test]
async fn overlong_request_line_is_414() {
    let (origin, log) = start_origin(HELLO_CLOSE).await;
    let mut config = test_config();
    config.buffers.max_line_size = 256;
    let proxy = start_proxy(config);

    let path = "p".repeat(300);
    let request = format!("GET http://{origin}/{path} HTTP/1.1\r\nHost: {origin}\r\n\r\n");
    let response = exchange(proxy.addr, request.as_bytes()).await;

    assert!(response.starts_with("HTTP/1.1 414 URI Too Long\r\n"));
    assert!(log.requests().is_empty());
}

#[tokio::test]
async fn pooled_connection_closed_by_origin_is_replaced() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let mut reader = BufReader::new(socket);
            if read_message(&mut reader).await.is_some() {
                let _ = reader
                    .get_mut()
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok")
                    .await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            // drop the connection although it was advertised as reusable
        }
    });

    let mut config = test_config();
    config.pool.upstream_keep_alive = true;
    let proxy = start_proxy(config);

    for _ in 0..2 {
        let request =
            format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n");
        let response = exchange(proxy.addr, request.as_bytes()).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("ok"));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn continue_response_is_relayed_before_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = listener.local_addr().unwrap();
    let (body_tx, body_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        while line != "\r\n" {
            line.clear();
            reader.read_line(&mut line).await.unwrap();
        }
        reader
            .get_mut()
            .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
            .await
            .unwrap();
        let mut body = [0u8; 5];
        reader.read_exact(&mut body).await.unwrap();
        let _ = body_tx.send(body.to_vec());
        reader
            .get_mut()
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await
            .unwrap();
    });

    let proxy = start_proxy(test_config());
    let stream = TcpStream::connect(proxy.addr).await.unwrap();
    let mut client = BufReader::new(stream);
    let head = format!(
        "POST http://{origin}/upload HTTP/1.1\r\nHost: {origin}\r\nContent-Length: 5\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n"
    );
    client.get_mut().write_all(head.as_bytes()).await.unwrap();

    let interim = tokio::time::timeout(Duration::from_secs(5), read_message(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert!(interim.starts_with("HTTP/1.1 100 Continue\r\n"));

    client.get_mut().write_all(b"hello").await.unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), read_message(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("ok"));
    assert_eq!(body_rx.await.unwrap(), b"hello");
}
