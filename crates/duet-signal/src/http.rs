//! Minimal HTTP/1.1 responder sharing the WebSocket port

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use tracing::debug;

use crate::discovery::local_ips;
use crate::rooms::RoomManager;

/// Longest room code accepted in a `/room/:code` path
const MAX_ROUTE_CODE_LEN: usize = 32;

const FALLBACK_INDEX: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Duet</title></head>\n<body><h1>Duet</h1><p>Create or join a room to start chatting.</p></body></html>\n";

const FALLBACK_CHAT: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Duet room</title></head>\n<body><h1>Duet room</h1><p>Waiting for your partner...</p></body></html>\n";

/// Request line of an incoming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
}

impl HttpRequest {
    /// Parse the request line out of a request head
    pub fn parse(head: &str) -> Option<Self> {
        let mut parts = head.lines().next()?.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?;
        let path = target.split(['?', '#']).next().unwrap_or("/").to_string();
        Some(Self { method, path })
    }
}

/// Whether a request head asks for a WebSocket upgrade
pub fn is_websocket_upgrade(head: &str) -> bool {
    head.lines().skip(1).any(|line| {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        name.trim().eq_ignore_ascii_case("upgrade")
            && value
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    fn json(status: u16, reason: &'static str, body: serde_json::Value) -> Self {
        Self {
            status,
            reason,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    fn html(body: String) -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    pub fn not_found() -> Self {
        Self::json(404, "Not Found", json!({"error": "not found"}))
    }

    pub fn bad_request() -> Self {
        Self::json(400, "Bad Request", json!({"error": "bad request"}))
    }

    fn method_not_allowed() -> Self {
        Self::json(405, "Method Not Allowed", json!({"error": "method not allowed"}))
    }

    /// Serialize with `Connection: close`
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// What the HTTP routes can see
pub struct HttpContext<'a> {
    pub peer_id: &'a str,
    pub rooms: &'a RoomManager,
    pub started_at: Instant,
    pub public_dir: Option<&'a Path>,
}

/// Answer one request
pub async fn route(request: &HttpRequest, ctx: &HttpContext<'_>) -> HttpResponse {
    if request.method != "GET" {
        return HttpResponse::method_not_allowed();
    }

    let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["health"] => HttpResponse::json(
            200,
            "OK",
            json!({
                "status": "ok",
                "rooms": ctx.rooms.room_count(),
                "uptime": ctx.started_at.elapsed().as_secs_f64(),
            }),
        ),
        ["api", "info"] => HttpResponse::json(
            200,
            "OK",
            json!({
                "peerId": ctx.peer_id,
                "localIPs": local_ips().iter().map(|ip| ip.to_string()).collect::<Vec<_>>(),
            }),
        ),
        [] | ["index.html"] => page(ctx.public_dir, "index.html", FALLBACK_INDEX).await,
        ["room", code] if is_routable_code(code) => {
            page(ctx.public_dir, "chat.html", FALLBACK_CHAT).await
        }
        _ => HttpResponse::not_found(),
    }
}

fn is_routable_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_ROUTE_CODE_LEN
        && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

async fn page(public_dir: Option<&Path>, name: &str, fallback: &str) -> HttpResponse {
    if let Some(dir) = public_dir {
        let path: PathBuf = dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => return HttpResponse::html(body),
            Err(e) => debug!("Serving built-in {} ({:?}: {})", name, path, e),
        }
    }
    HttpResponse::html(fallback.to_string())
}
