//! HTTP trigger server.
//!
//! A small HTTP/1.1 server on a tokio `TcpListener`: one request
//! per connection, `Connection: close` on every response.
//!
//! | Route          | Behaviour                                                    |
//! |----------------|--------------------------------------------------------------|
//! | `POST /`       | JSON `{fn, params}`; 200 `text/plain` or 500 with error text |
//! | `POST /events` | Any JSON payload; 204 at once, export runs in the background |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::AppError;
use crate::trigger::event;
use crate::trigger::functions::{self, Invocation};

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Longest request or header line accepted.
const MAX_LINE_BYTES: usize = 8 * 1024;

const MAX_HEADERS: usize = 100;

/// Time a client has to send the complete request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
struct HttpResponse {
    status: u16,
    reason: &'static str,
    body: String,
}

impl HttpResponse {
    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            body: body.into(),
        }
    }

    fn ok(body: impl Into<String>) -> Self {
        Self::text(200, "OK", body)
    }

    fn no_content() -> Self {
        Self::text(204, "No Content", "")
    }

    fn server_error(err: &AppError) -> Self {
        Self::text(500, "Internal Server Error", err.response_text())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

pub struct HttpTrigger {
    listener: TcpListener,
    ctx: Arc<AppContext>,
    read_timeout: Duration,
}

impl HttpTrigger {
    /// Binds the listener without accepting connections yet.
    pub async fn bind(addr: SocketAddr, ctx: Arc<AppContext>) -> Result<Self, AppError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("[TRIGGER] Failed to bind {}: {}", addr, e);
            AppError::Io(format!("Failed to bind {}: {}", addr, e))
        })?;
        Ok(Self {
            listener,
            ctx,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Overrides how long a client may take to send its request.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the task is dropped.
    ///
    /// Each connection is served on its own task.
    pub async fn serve(self) -> Result<(), AppError> {
        info!("[TRIGGER] Listening on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("[TRIGGER] Failed to accept connection: {}", e);
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, ctx, read_timeout).await {
                    warn!("[TRIGGER] Connection from {} dropped: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ctx: Arc<AppContext>,
    read_timeout: Duration,
) -> Result<(), AppError> {
    let request = {
        let mut reader = BufReader::new(&mut stream);
        tokio::time::timeout(read_timeout, read_request(&mut reader)).await
    };

    let response = match request {
        Ok(Ok(request)) => route(&ctx, request).await,
        Ok(Err(e)) => HttpResponse::text(400, "Bad Request", e.to_string()),
        Err(_) => {
            warn!("[TRIGGER] Request not received within {:?}", read_timeout);
            HttpResponse::text(408, "Request Timeout", "request not received in time")
        }
    };

    send_response(&mut stream, &response).await
}

async fn route(ctx: &Arc<AppContext>, request: HttpRequest) -> HttpResponse {
    let path = request.path.split('?').next().unwrap_or("");

    match (request.method.as_str(), path) {
        ("POST", "/") => handle_invoke(ctx, &request.body).await,
        ("POST", "/events") => handle_event(ctx, &request.body),
        (_, "/") | (_, "/events") => HttpResponse::text(405, "Method Not Allowed", "use POST"),
        _ => HttpResponse::text(404, "Not Found", "not found"),
    }
}

async fn handle_invoke(ctx: &AppContext, body: &[u8]) -> HttpResponse {
    let invocation: Invocation = match serde_json::from_slice(body) {
        Ok(invocation) => invocation,
        Err(e) => {
            let err = AppError::Config(format!("invalid trigger body: {}", e));
            warn!("[TRIGGER] {}", err);
            return HttpResponse::server_error(&err);
        }
    };

    match functions::invoke(ctx, &invocation).await {
        Ok(message) => HttpResponse::ok(message),
        Err(e) => {
            error!("[TRIGGER] {} failed: {}", invocation.function, e.response_text());
            HttpResponse::server_error(&e)
        }
    }
}

fn handle_event(ctx: &Arc<AppContext>, body: &[u8]) -> HttpResponse {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                return HttpResponse::text(400, "Bad Request", format!("invalid event payload: {}", e))
            }
        }
    };

    // Detached: the handle is dropped and the task keeps running.
    let _ = event::dispatch(Arc::clone(ctx), payload);
    HttpResponse::no_content()
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

async fn read_line_limited<R>(reader: &mut R, what: &str) -> Result<String, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader
        .take(MAX_LINE_BYTES as u64)
        .read_line(&mut line)
        .await
        .map_err(|e| AppError::Io(format!("Failed to read {}: {}", what, e)))?;

    if read == 0 {
        return Err(AppError::Io(format!("connection closed before {}", what)));
    }
    if !line.ends_with('\n') {
        return Err(AppError::Io(format!("{} too long", what)));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_request<R>(reader: &mut R) -> Result<HttpRequest, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = read_line_limited(reader, "request line").await?;
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version)) if version.starts_with("HTTP/1.") => {
            (method.to_string(), path.to_string())
        }
        _ => return Err(AppError::Io("malformed request line".into())),
    };

    let mut content_length: usize = 0;
    let mut header_count = 0;
    loop {
        let line = read_line_limited(reader, "header").await?;
        if line.is_empty() {
            break;
        }
        header_count += 1;
        if header_count > MAX_HEADERS {
            return Err(AppError::Io("too many headers".into()));
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(AppError::Io("malformed header".into()));
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .trim()
                .parse()
                .map_err(|_| AppError::Io("invalid Content-Length".into()))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(AppError::Io("chunked bodies are not supported".into()));
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(AppError::Io(format!(
            "body of {} bytes exceeds {} byte limit",
            content_length, MAX_BODY_BYTES
        )));
    }

    let mut body = vec![0u8; content_length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| AppError::Io(format!("Failed to read body: {}", e)))?;

    Ok(HttpRequest { method, path, body })
}

async fn send_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<(), AppError> {
    let head = if response.status == 204 {
        format!(
            "HTTP/1.1 {} {}\r\nConnection: close\r\n\r\n",
            response.status, response.reason
        )
    } else {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            response.status,
            response.reason,
            response.body.len()
        )
    };

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
