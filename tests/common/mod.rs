//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use relay_gate::config::RelayConfig;
use relay_gate::http::HttpServer;
use relay_gate::lifecycle::Shutdown;

/// A request as the origin received it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

/// Raw HTTP/1.1 response with `Content-Length` and `Connection: close`.
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// A mock destination speaking raw HTTP/1.1 over TCP.
pub struct Origin {
    pub addr: SocketAddr,
    pub seen: mpsc::UnboundedReceiver<SeenRequest>,
}

impl Origin {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Next request the origin received.
    pub async fn next_request(&mut self) -> SeenRequest {
        tokio::time::timeout(Duration::from_secs(5), self.seen.recv())
            .await
            .expect("origin saw no request")
            .expect("origin stopped")
    }
}

/// Start an origin that answers every request with `respond(request)`.
pub async fn start_origin<F>(respond: F) -> Origin
where
    F: Fn(&SeenRequest) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, seen) = mpsc::unbounded_channel();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                let Some(request) = read_request(&mut reader).await else {
                    return;
                };
                let response = respond(&request);
                let _ = tx.send(request);
                let mut socket = reader.into_inner();
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Origin { addr, seen }
}

/// Start an origin that serves one fixed response.
pub async fn start_fixed_origin(response: Vec<u8>) -> Origin {
    start_origin(move |_| response.clone()).await
}

/// Start an origin that accepts connections and never answers.
pub async fn start_silent_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Start an origin that waits `delay` after each request, writes `partial`,
/// and then holds the connection open without finishing the response.
pub async fn start_stalling_origin(delay: Duration, partial: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let partial = Arc::new(partial);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let partial = partial.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                if read_request(&mut reader).await.is_none() {
                    return;
                }
                tokio::time::sleep(delay).await;
                let mut socket = reader.into_inner();
                let _ = socket.write_all(&partial).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    addr
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<SeenRequest> {
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.trim_end().splitn(3, ' ');
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };
    let mut body = Vec::new();
    if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(len, 0);
        reader.read_exact(&mut body).await.ok()?;
    } else if header("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).await.ok()?;
            let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).await.ok()?;
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }

    Some(SeenRequest {
        method,
        target,
        headers,
        body,
    })
}

/// Websocket echo origin. The flag flips once the origin's side of a
/// connection has ended.
pub async fn start_ws_origin() -> (SocketAddr, Arc<AtomicBool>) {
    let closed = Arc::new(AtomicBool::new(false));
    let app = axum::Router::new()
        .route("/ws", get(ws_echo))
        .with_state(closed.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, closed)
}

async fn ws_echo(ws: WebSocketUpgrade, State(closed): State<Arc<AtomicBool>>) -> Response {
    ws.on_upgrade(move |socket| echo(socket, closed))
}

async fn echo(mut socket: WebSocket, closed: Arc<AtomicBool>) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    closed.store(true, Ordering::SeqCst);
}

/// Poll `flag` until it is set or `limit` passes.
pub async fn wait_for_flag(flag: &AtomicBool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    flag.load(Ordering::SeqCst)
}

/// A relay running on an ephemeral port.
pub struct Relay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Relay {
    pub fn tunnel_url(&self, destination: &str) -> String {
        format!("http://{}/bare/{}", self.addr, urlencoding::encode(destination))
    }

    pub fn rewrite_url(&self, destination: &str) -> String {
        format!("http://{}/?url={}", self.addr, urlencoding::encode(destination))
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }
}

/// Start a relay with `config`. The listener is bound before returning.
pub async fn start_relay(config: RelayConfig) -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    Relay { addr, shutdown }
}

/// Client that never uses a system proxy and never follows redirects.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
