//! Signal server: one TCP listener for HTTP pages and WebSocket signaling

use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, info, warn};

use duet_core::{generate_peer_id, Config, RoomConfig, SignalError, SignalMode, PEER_ID_HEADER};

use crate::discovery::{forward_events, Discovery};
use crate::http::{self, HttpContext, HttpRequest, HttpResponse};
use crate::mesh::{MeshEvent, PeerMesh};
use crate::relay::SignalingRelay;
use crate::rooms::RoomManager;

/// Largest request head inspected before dispatch
const MAX_REQUEST_HEAD: usize = 8192;

/// Time allowed for a client to send its request head
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Signal server state
pub struct SignalServer {
    config: Config,
    peer_id: String,
    rooms: Arc<RoomManager>,
    relay: Arc<SignalingRelay>,
    discovery: Option<Arc<Discovery>>,
    mesh_events: Mutex<Option<mpsc::UnboundedReceiver<MeshEvent>>>,
    started_at: Instant,
}

/// Shared by every connection task
struct ConnectionContext {
    relay: Arc<SignalingRelay>,
    peer_id: String,
    started_at: Instant,
    public_dir: Option<PathBuf>,
}

impl SignalServer {
    pub fn new(config: Config) -> Result<Self, SignalError> {
        let peer_id = generate_peer_id()
            .map_err(|e| SignalError::Transport(format!("RNG failed: {}", e)))?;
        let rooms = Arc::new(RoomManager::new());

        let (relay, discovery, mesh_events) = match config.server.mode {
            SignalMode::RoomCode => (SignalingRelay::room_code(rooms.clone()), None, None),
            SignalMode::Lan => {
                let discovery = Arc::new(Discovery::new(
                    peer_id.clone(),
                    config.server.port,
                    config.discovery.clone(),
                ));
                let (mesh, events) = PeerMesh::new(peer_id.clone());
                let relay = SignalingRelay::lan(rooms.clone(), discovery.clone(), mesh);
                (relay, Some(discovery), Some(events))
            }
        };

        Ok(Self {
            config,
            peer_id,
            rooms,
            relay: Arc::new(relay),
            discovery,
            mesh_events: Mutex::new(mesh_events),
            started_at: Instant::now(),
        })
    }

    /// This instance's peer ID
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn mode(&self) -> SignalMode {
        self.config.server.mode
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Peer table (LAN mode only)
    pub fn discovery(&self) -> Option<&Arc<Discovery>> {
        self.discovery.as_ref()
    }

    /// Relay links to other instances (LAN mode only)
    pub fn mesh(&self) -> Option<&PeerMesh> {
        self.relay.mesh()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    /// Bind the configured address and serve until `shutdown` flips
    pub async fn serve(&self, shutdown: watch::Receiver<bool>) -> Result<(), SignalError> {
        let listener = TcpListener::bind(self.config.server.socket_addr()).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SignalError> {
        let local_addr = listener.local_addr()?;
        let udp_socket = match &self.discovery {
            Some(_) => Some(Discovery::bind_socket(self.config.discovery.udp_port)?),
            None => None,
        };

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(tokio::spawn(sweep_stale_rooms(
            self.rooms.clone(),
            self.config.rooms.clone(),
            shutdown.clone(),
        )));

        if let (Some(discovery), Some(mesh), Some(socket)) =
            (&self.discovery, self.relay.mesh(), udp_socket)
        {
            tasks.push(tokio::spawn(forward_events(
                discovery.subscribe(),
                Arc::new(mesh.clone()),
                shutdown.clone(),
            )));
            tasks.push(tokio::spawn(forward_events(
                discovery.subscribe(),
                self.relay.clone(),
                shutdown.clone(),
            )));
            if let Some(events) = self.mesh_events.lock().take() {
                tasks.push(tokio::spawn(
                    self.relay.clone().run_mesh_events(events, shutdown.clone()),
                ));
            }
            tasks.push(tokio::spawn(discovery.clone().run(socket, shutdown.clone())));
        }

        info!(
            "Signal server listening on {} ({} mode, peer {})",
            local_addr, self.config.server.mode, self.peer_id
        );

        let ctx = Arc::new(ConnectionContext {
            relay: self.relay.clone(),
            peer_id: self.peer_id.clone(),
            started_at: self.started_at,
            public_dir: self.config.server.public_dir.clone(),
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ctx).await {
                                debug!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }

        drop(listener);
        if let Some(mesh) = self.relay.mesh() {
            mesh.shutdown();
        }
        for task in tasks {
            let _ = task.await;
        }

        info!("Signal server stopped");
        Ok(())
    }
}

async fn sweep_stale_rooms(
    rooms: Arc<RoomManager>,
    config: RoomConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.cleanup_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = rooms.cleanup_stale(config.stale_max_age());
                if !removed.is_empty() {
                    info!("Removed {} stale rooms", removed.len());
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<(), SignalError> {
    let head = peek_request_head(&stream).await?;
    if !http::is_websocket_upgrade(&head) {
        return serve_http(stream, &ctx).await;
    }

    let mut link_peer_id: Option<String> = None;
    let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
        link_peer_id = req
            .headers()
            .get(PEER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok::<_, ErrorResponse>(resp)
    })
    .await
    .map_err(|e| SignalError::Transport(e.to_string()))?;

    match link_peer_id {
        Some(peer_id) => handle_peer_link(ws, peer_id, &ctx).await,
        None => handle_browser(ws, addr, &ctx).await,
    }
}

/// Wait until the full request head is buffered, without consuming it
async fn peek_request_head(stream: &TcpStream) -> Result<String, SignalError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let deadline = tokio::time::Instant::now() + REQUEST_HEAD_TIMEOUT;
    let timed_out = || SignalError::Transport("timed out reading request head".into());

    loop {
        let n = timeout_at(deadline, stream.peek(&mut buf))
            .await
            .map_err(|_| timed_out())??;
        if n == 0 {
            return Err(SignalError::Transport("connection closed".into()));
        }
        let head = &buf[..n];
        if n == buf.len() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(String::from_utf8_lossy(head).into_owned());
        }
        timeout_at(deadline, wait_for_more(stream, n))
            .await
            .map_err(|_| timed_out())??;
    }
}

/// Wait until more than `buffered` bytes can be peeked
///
/// A peek leaves readiness set, so the check runs inside `try_io`, which
/// clears it on `WouldBlock` unless new data arrived meanwhile.
async fn wait_for_more(stream: &TcpStream, buffered: usize) -> io::Result<()> {
    let mut probe = vec![MaybeUninit::<u8>::uninit(); buffered + 1];
    loop {
        stream.readable().await?;
        let more = stream.try_io(Interest::READABLE, || {
            let n = SockRef::from(stream).peek(&mut probe)?;
            if n == 0 || n > buffered {
                Ok(())
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            }
        });
        match more {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

async fn serve_http(mut stream: TcpStream, ctx: &ConnectionContext) -> Result<(), SignalError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    let n = stream.read(&mut buf).await?;
    let head = String::from_utf8_lossy(&buf[..n]);

    let response = match HttpRequest::parse(&head) {
        Some(request) => {
            let http_ctx = HttpContext {
                peer_id: &ctx.peer_id,
                rooms: ctx.relay.rooms(),
                started_at: ctx.started_at,
                public_dir: ctx.public_dir.as_deref(),
            };
            let response = http::route(&request, &http_ctx).await;
            debug!("{} {} -> {}", request.method, request.path, response.status);
            response
        }
        None => HttpResponse::bad_request(),
    };

    stream.write_all(&response.to_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Drain a connection's outbound queue into its socket
async fn write_frames<S>(mut sink: S, mut outbound: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(msg) = outbound.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn handle_browser(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<(), SignalError> {
    let (sink, mut frames) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, rx));

    let conn = ctx.relay.connect_browser(tx.clone());
    debug!("Browser {} connected as {}", addr, conn);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => ctx.relay.handle_browser_text(conn, &text),
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error from {}: {}", conn, e);
                break;
            }
        }
    }

    ctx.relay.disconnect_browser(conn);
    drop(tx);
    let _ = writer.await;
    debug!("Browser {} disconnected", conn);
    Ok(())
}

async fn handle_peer_link(
    ws: WebSocketStream<TcpStream>,
    peer_id: String,
    ctx: &ConnectionContext,
) -> Result<(), SignalError> {
    let Some(mesh) = ctx.relay.mesh().cloned() else {
        warn!("Rejecting link from peer {}: not in LAN mode", peer_id);
        let mut ws = ws;
        let _ = ws.close(None).await;
        return Ok(());
    };

    let (sink, mut frames) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, rx));
    let link = mesh.register_inbound(&peer_id, tx.clone());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => mesh.deliver(&peer_id, text),
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Link error from peer {}: {}", peer_id, e);
                break;
            }
        }
    }

    if let Some(id) = link {
        mesh.unregister(&peer_id, id);
    }
    drop(tx);
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    use crate::discovery::{DiscoverySubscriber, PeerRecord};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Node {
        server: Arc<SignalServer>,
        addr: SocketAddr,
        stop: watch::Sender<bool>,
        handle: JoinHandle<()>,
    }

    impl Node {
        fn mesh(&self) -> &PeerMesh {
            self.server.mesh().unwrap()
        }

        fn record(&self) -> PeerRecord {
            PeerRecord {
                peer_id: self.server.peer_id().to_string(),
                address: self.addr.ip(),
                http_port: self.addr.port(),
                last_seen: Instant::now(),
                announced_timestamp: 0,
            }
        }

        async fn stop(self) {
            self.stop.send(true).unwrap();
            self.handle.await.unwrap();
        }
    }

    async fn start_node(config: Config) -> Node {
        let server = Arc::new(SignalServer::new(config).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, rx) = watch::channel(false);
        let serving = server.clone();
        let handle = tokio::spawn(async move {
            serving.serve_listener(listener, rx).await.unwrap();
        });
        Node {
            server,
            addr,
            stop,
            handle,
        }
    }

    async fn start(config: Config) -> (SocketAddr, watch::Sender<bool>, JoinHandle<()>) {
        let node = start_node(config).await;
        (node.addr, node.stop, node.handle)
    }

    fn lan_config() -> Config {
        let mut config = Config::default();
        config.server.mode = SignalMode::Lan;
        config.discovery.udp_port = 0;
        config
    }

    /// Both meshes hold a usable link to each other
    fn linked(a: &Node, b: &Node) -> bool {
        a.mesh().is_linked(b.server.peer_id()) && b.mesh().is_linked(a.server.peer_id())
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }

    async fn client(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_create_join_and_relay() {
        let (addr, stop, handle) = start(Config::default()).await;

        let mut host = client(addr).await;
        send(&mut host, serde_json::json!({"type": "create-room"})).await;
        let created = recv(&mut host).await;
        assert_eq!(created["type"], "room-created");
        let code = created["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);

        let mut guest = client(addr).await;
        send(
            &mut guest,
            serde_json::json!({"type": "join-room", "code": code.to_lowercase()}),
        )
        .await;
        let joined = recv(&mut guest).await;
        assert_eq!(joined["type"], "room-joined");
        assert_eq!(joined["code"], code.as_str());
        assert_eq!(joined["isHost"], false);

        let notice = recv(&mut host).await;
        assert_eq!(notice["type"], "peer-joined");

        let offer = serde_json::json!({"type": "offer", "data": {"sdp": "v=0"}});
        send(&mut host, offer.clone()).await;
        assert_eq!(recv(&mut guest).await, offer);

        let answer = serde_json::json!({"type": "answer", "data": {"sdp": "v=0 answer"}});
        send(&mut guest, answer.clone()).await;
        assert_eq!(recv(&mut host).await, answer);

        guest.close(None).await.unwrap();
        let left = recv(&mut host).await;
        assert_eq!(left["type"], "peer-left");

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_room_errors_over_websocket() {
        let (addr, stop, handle) = start(Config::default()).await;

        let mut a = client(addr).await;
        send(&mut a, serde_json::json!({"type": "check-room", "code": "ZZZZZZ"})).await;
        let status = recv(&mut a).await;
        assert_eq!(status["type"], "room-status");
        assert_eq!(status["exists"], false);
        assert_eq!(status["isFull"], false);

        send(&mut a, serde_json::json!({"type": "join-room"})).await;
        let err = recv(&mut a).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"], "Room code is required");

        send(&mut a, serde_json::json!({"type": "join-room", "data": {"code": "pair01"}})).await;
        let joined = recv(&mut a).await;
        assert_eq!(joined["code"], "PAIR01");
        assert_eq!(joined["isHost"], true);

        let mut b = client(addr).await;
        send(&mut b, serde_json::json!({"type": "join-room", "code": "PAIR01"})).await;
        assert_eq!(recv(&mut b).await["type"], "room-joined");
        assert_eq!(recv(&mut a).await["type"], "peer-joined");

        let mut c = client(addr).await;
        send(&mut c, serde_json::json!({"type": "join-room", "code": "PAIR01"})).await;
        let full = recv(&mut c).await;
        assert_eq!(full["type"], "error");
        assert_eq!(full["error"], "Room is full");

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_on_shared_port() {
        let (addr, stop, handle) = start(Config::default()).await;

        let health = http_get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200 OK"));
        assert!(health.contains(r#""status":"ok""#));
        assert!(health.contains(r#""rooms":0"#));

        let page = http_get(addr, "/room/ABC123").await;
        assert!(page.starts_with("HTTP/1.1 200 OK"));
        assert!(page.contains("text/html"));

        let missing = http_get(addr, "/missing").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_room_code_mode_closes_peer_links() {
        let (addr, stop, handle) = start(Config::default()).await;

        let mut request = format!("ws://{}", addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(PEER_ID_HEADER, HeaderValue::from_static("feedfacefeedface"));
        let (mut link, _) = connect_async(request).await.unwrap();

        let next = timeout(Duration::from_secs(5), link.next()).await.unwrap();
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_lan_mode_relays_peer_frames_to_browsers() {
        let mut config = Config::default();
        config.server.mode = SignalMode::Lan;
        config.discovery.udp_port = 0;
        let (addr, stop, handle) = start(config).await;

        let mut browser = client(addr).await;
        let list = recv(&mut browser).await;
        assert_eq!(list["type"], "peer-list");
        assert_eq!(list["peers"], serde_json::json!([]));

        send(&mut browser, serde_json::json!({"type": "create-room"})).await;
        let err = recv(&mut browser).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "unsupported_in_mode");

        let mut request = format!("ws://{}", addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert(PEER_ID_HEADER, HeaderValue::from_static("feedfacefeedface"));
        let (mut link, _) = connect_async(request).await.unwrap();
        send(
            &mut link,
            serde_json::json!({"type": "offer", "fromPeerId": "spoofed", "data": {"sdp": "v=0"}}),
        )
        .await;

        let relayed = recv(&mut browser).await;
        assert_eq!(relayed["type"], "offer");
        assert_eq!(relayed["fromPeerId"], "feedfacefeedface");
        assert_eq!(relayed["data"]["sdp"], "v=0");

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_head_split_across_packets() {
        let (addr, stop, handle) = start(Config::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /health HTTP/1.1\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        stream.write_all(b"Host: localhost\r\n\r\n").await.unwrap();

        let mut out = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
            .await
            .unwrap()
            .unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK"));

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_bind_failure_is_reported() {
        // Held without SO_REUSEADDR, so the discovery bind cannot share it
        let taken = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
        let mut config = lan_config();
        config.discovery.udp_port = taken.local_addr().unwrap().port();

        let server = SignalServer::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_stop, rx) = watch::channel(false);

        let result = timeout(Duration::from_secs(5), server.serve_listener(listener, rx))
            .await
            .expect("serve_listener should fail fast");
        assert!(matches!(result, Err(SignalError::Io(_))));
    }

    #[tokio::test]
    async fn test_simultaneous_dials_settle_on_one_link() {
        for _ in 0..5 {
            let a = start_node(lan_config()).await;
            let b = start_node(lan_config()).await;

            a.mesh().connect(&b.record());
            b.mesh().connect(&a.record());

            assert!(eventually(|| linked(&a, &b)).await, "instances never linked");
            // The losing dial is gone by now; the kept link must survive it
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(linked(&a, &b), "link lost after the duplicate was dropped");

            a.stop().await;
            b.stop().await;
        }
    }

    #[tokio::test]
    async fn test_offer_and_answer_cross_instances() {
        let a = start_node(lan_config()).await;
        let b = start_node(lan_config()).await;

        let mut browser_a = client(a.addr).await;
        assert_eq!(recv(&mut browser_a).await["type"], "peer-list");
        let mut browser_b = client(b.addr).await;
        assert_eq!(recv(&mut browser_b).await["type"], "peer-list");

        // As if A had just discovered B
        a.mesh().on_peer_joined(&b.record());
        assert!(eventually(|| linked(&a, &b)).await, "instances never linked");

        let a_id = a.server.peer_id().to_string();
        let b_id = b.server.peer_id().to_string();

        send(
            &mut browser_a,
            serde_json::json!({"type": "offer", "targetPeerId": b_id, "data": {"sdp": "v=0 offer"}}),
        )
        .await;
        let offer = recv(&mut browser_b).await;
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["fromPeerId"], a_id.as_str());
        assert_eq!(offer["data"]["sdp"], "v=0 offer");
        assert!(offer.get("targetPeerId").is_none());

        send(
            &mut browser_b,
            serde_json::json!({"type": "answer", "targetPeerId": a_id, "data": {"sdp": "v=0 answer"}}),
        )
        .await;
        let answer = recv(&mut browser_a).await;
        assert_eq!(answer["type"], "answer");
        assert_eq!(answer["fromPeerId"], b_id.as_str());
        assert_eq!(answer["data"]["sdp"], "v=0 answer");

        a.stop().await;
        b.stop().await;
    }
}
