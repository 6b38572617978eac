use crate::config::HeartbeatConfig;
use crate::error::{AppError, FanoutError};
use crate::metrics::CONNECTIONS_ACTIVE;
use crate::models::{ChatMessage, Comment};
use crate::state::AppState;
use crate::websocket::dispatcher::{DispatcherState, FanoutDispatcher};
use crate::websocket::session::ConnectionId;
use crate::websocket::sink::ClientSession;
use crate::websocket::Subscription;
use actix_http::ws::Item;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, ProtocolError};
use futures_util::{Stream, StreamExt};
use std::future::{pending, Future};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Largest text message accepted from continuation frames.
const MAX_FRAGMENTED_MESSAGE: usize = 64 * 1024;

/// Which half of the chat pipeline a WebSocket route wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// New-comment announcements, server → client only.
    Comments,
    /// Client → broker chat only.
    ChatInbound,
    /// Broker → client chat only.
    ChatOutbound,
    /// Both chat directions on one connection.
    ChatDuplex,
}

impl Route {
    fn label(self) -> &'static str {
        match self {
            Route::Comments => "comments",
            Route::ChatInbound => "chat_inbound",
            Route::ChatOutbound => "chat_outbound",
            Route::ChatDuplex => "chat_duplex",
        }
    }

    fn accepts_input(self) -> bool {
        matches!(self, Route::ChatInbound | Route::ChatDuplex)
    }
}

enum Outbound {
    None,
    Comments(Subscription<Comment>),
    Chat(Subscription<ChatMessage>),
}

impl Outbound {
    fn is_some(&self) -> bool {
        !matches!(self, Outbound::None)
    }
}

/// Handshake-time facts about one connection. The identity lives in the
/// session registry.
struct Link {
    connection_id: ConnectionId,
    route: Route,
}

#[get("/topic/comments.new")]
pub async fn comments_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    connect(req, stream, state, Route::Comments).await
}

#[get("/app/chatMessage.new")]
pub async fn chat_inbound_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    connect(req, stream, state, Route::ChatInbound).await
}

#[get("/topic/chatMessage.new")]
pub async fn chat_outbound_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    connect(req, stream, state, Route::ChatOutbound).await
}

#[get("/ws/chat")]
pub async fn chat_duplex_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    connect(req, stream, state, Route::ChatDuplex).await
}

async fn attach(state: &AppState, route: Route) -> Result<Outbound, FanoutError> {
    match route {
        Route::Comments => state.bridge.attach_comments().await.map(Outbound::Comments),
        Route::ChatOutbound | Route::ChatDuplex => {
            state.bridge.attach_chat().await.map(Outbound::Chat)
        }
        Route::ChatInbound => Ok(Outbound::None),
    }
}

async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    route: Route,
) -> Result<HttpResponse, Error> {
    let connection_id = ConnectionId::new();
    state.sessions.on_open(connection_id, req.query_string());

    // Attach before upgrading so the client only sees a 101 once the topic
    // subscription exists.
    let outbound = match attach(&state, route).await {
        Ok(outbound) => outbound,
        Err(e) => {
            state.sessions.on_close(&connection_id);
            warn!(
                connection_id = %connection_id,
                route = route.label(),
                error = %e,
                "Rejecting WebSocket: broker subscription unavailable"
            );
            return Err(AppError::from(e).into());
        }
    };

    let (response, session, frames) = match actix_ws::handle(&req, stream) {
        Ok(parts) => parts,
        Err(e) => {
            state.sessions.on_close(&connection_id);
            return Err(e);
        }
    };

    let link = Link {
        connection_id,
        route,
    };
    actix_web::rt::spawn(drive(state.get_ref().clone(), link, session, frames, outbound));

    Ok(response)
}

/// Run one connection to completion: frame reader, inbound gateway and
/// outbound dispatcher side by side.
async fn drive<C, F>(state: AppState, link: Link, session: C, frames: F, outbound: Outbound)
where
    C: ClientSession,
    F: Stream<Item = Result<Message, ProtocolError>> + Unpin,
{
    let Link {
        connection_id,
        route,
    } = link;

    let user = match state.sessions.lookup(&connection_id) {
        Ok(user) => user,
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                route = route.label(),
                error = %e,
                "Closing WebSocket without a registered session"
            );
            session.close_with(Some(CloseCode::Error.into())).await;
            return;
        }
    };

    CONNECTIONS_ACTIVE.with_label_values(&[route.label()]).inc();
    info!(
        connection_id = %connection_id,
        user = %user,
        route = route.label(),
        "WebSocket connected"
    );

    let (line_tx, line_rx) = if route.accepts_input() {
        let (tx, rx) = mpsc::channel::<String>(state.config.fanout_buffer);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<DispatcherState>();
    let done_rx = outbound.is_some().then_some(done_rx);

    let reader = async {
        let reason = read_frames(
            session.clone(),
            frames,
            line_tx,
            done_rx,
            state.config.heartbeat,
            connection_id,
        )
        .await;
        let _ = stop_tx.send(());
        reason
    };

    let inbound = async {
        if let Some(rx) = line_rx {
            state.gateway.run(&user, ReceiverStream::new(rx)).await;
        }
    };

    let stop = async {
        let _ = stop_rx.await;
    };
    let outbound = dispatch(outbound, &user, session.clone(), stop, done_tx);

    let (reason, (), ()) = tokio::join!(reader, inbound, outbound);

    session.close_with(reason).await;
    state.sessions.on_close(&connection_id);
    CONNECTIONS_ACTIVE.with_label_values(&[route.label()]).dec();

    info!(
        connection_id = %connection_id,
        user = %user,
        route = route.label(),
        "WebSocket disconnected"
    );
}

async fn dispatch<C, F>(
    outbound: Outbound,
    viewer: &str,
    mut session: C,
    stop: F,
    done: oneshot::Sender<DispatcherState>,
) where
    C: ClientSession,
    F: Future<Output = ()>,
{
    let report = match outbound {
        Outbound::None => return,
        Outbound::Comments(sub) => FanoutDispatcher::new(viewer, sub).run(&mut session, stop).await,
        Outbound::Chat(sub) => FanoutDispatcher::new(viewer, sub).run(&mut session, stop).await,
    };
    let _ = done.send(report.state);
}

/// In-progress fragmented message.
#[derive(Debug, Default)]
enum Fragments {
    #[default]
    Idle,
    Text(Vec<u8>),
    /// Binary payloads are ignored; only the end of the message is tracked.
    Binary,
}

impl Fragments {
    /// Feed one continuation frame. Yields the text once its last fragment
    /// arrives, or the close code the connection must end with.
    fn push(&mut self, item: Item) -> Result<Option<String>, CloseCode> {
        let (chunk, last) = match item {
            Item::FirstText(bytes) => {
                *self = Fragments::Text(Vec::with_capacity(bytes.len()));
                (bytes, false)
            }
            Item::FirstBinary(_) => {
                *self = Fragments::Binary;
                return Ok(None);
            }
            Item::Continue(bytes) => (bytes, false),
            Item::Last(bytes) => (bytes, true),
        };

        match self {
            Fragments::Idle => return Err(CloseCode::Protocol),
            Fragments::Binary => {}
            Fragments::Text(buf) => {
                if buf.len() + chunk.len() > MAX_FRAGMENTED_MESSAGE {
                    return Err(CloseCode::Size);
                }
                buf.extend_from_slice(&chunk);
            }
        }

        if !last {
            return Ok(None);
        }
        match std::mem::take(self) {
            Fragments::Text(buf) => String::from_utf8(buf)
                .map(Some)
                .map_err(|_| CloseCode::Invalid),
            _ => Ok(None),
        }
    }
}

/// Hand one client line to the inbound gateway. Returns false once the
/// gateway has gone away.
async fn forward_line(
    lines: &Option<mpsc::Sender<String>>,
    line: String,
    connection_id: ConnectionId,
) -> bool {
    match lines {
        Some(tx) => tx.send(line).await.is_ok(),
        None => {
            debug!(connection_id = %connection_id, "Ignoring text on outbound-only route");
            true
        }
    }
}

/// Read client frames until the client leaves, the heartbeat lapses or the
/// dispatcher ends. Text frames go to `lines` when the route accepts input.
/// Returns the close reason to send back.
async fn read_frames<C, F>(
    mut session: C,
    mut frames: F,
    lines: Option<mpsc::Sender<String>>,
    dispatcher_done: Option<oneshot::Receiver<DispatcherState>>,
    heartbeat: HeartbeatConfig,
    connection_id: ConnectionId,
) -> Option<CloseReason>
where
    C: ClientSession,
    F: Stream<Item = Result<Message, ProtocolError>> + Unpin,
{
    let mut last_seen = Instant::now();
    let mut ticker = tokio::time::interval(heartbeat.interval);
    let mut fragments = Fragments::default();

    let dispatcher_done = async move {
        match dispatcher_done {
            Some(rx) => rx.await.unwrap_or(DispatcherState::Detached),
            None => pending().await,
        }
    };
    tokio::pin!(dispatcher_done);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if Instant::now().duration_since(last_seen) > heartbeat.client_timeout {
                    warn!(connection_id = %connection_id, "WebSocket heartbeat failed, disconnecting");
                    return Some(CloseReason {
                        code: CloseCode::Away,
                        description: Some("heartbeat timeout".to_string()),
                    });
                }
                if session.send_ping().await.is_err() {
                    return None;
                }
            }

            state = &mut dispatcher_done => {
                let code = match state {
                    DispatcherState::Failed => CloseCode::Error,
                    _ => CloseCode::Away,
                };
                debug!(connection_id = %connection_id, state = state.as_str(), "Dispatcher ended, closing");
                return Some(code.into());
            }

            frame = frames.next() => match frame {
                Some(Ok(Message::Ping(bytes))) => {
                    last_seen = Instant::now();
                    if session.send_pong(&bytes).await.is_err() {
                        return None;
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    last_seen = Instant::now();
                }
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if !forward_line(&lines, text.to_string(), connection_id).await {
                        return None;
                    }
                }
                Some(Ok(Message::Continuation(item))) => {
                    last_seen = Instant::now();
                    match fragments.push(item) {
                        Ok(Some(text)) => {
                            if !forward_line(&lines, text, connection_id).await {
                                return None;
                            }
                        }
                        Ok(None) => {}
                        Err(code) => {
                            warn!(connection_id = %connection_id, ?code, "Rejecting fragmented message");
                            return Some(code.into());
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    last_seen = Instant::now();
                    debug!(connection_id = %connection_id, "Ignoring binary frame");
                }
                Some(Ok(Message::Close(reason))) => {
                    debug!(connection_id = %connection_id, ?reason, "Client requested close");
                    return reason;
                }
                Some(Ok(Message::Nop)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %connection_id, error = %e, "WebSocket protocol error");
                    return None;
                }
                None => return None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBroker, MessageBroker};
    use crate::config::Config;
    use crate::models::BrokerEnvelope;
    use crate::websocket::sink::ConnectionSink;
    use actix_web::web::Bytes;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[derive(Debug, PartialEq)]
    enum Event {
        Text(String),
        Ping,
        Pong(Vec<u8>),
        Close(Option<CloseReason>),
    }

    #[derive(Clone)]
    struct FakeSession {
        events: mpsc::UnboundedSender<Event>,
        fail_text: bool,
    }

    #[async_trait]
    impl ConnectionSink for FakeSession {
        async fn send_text(&mut self, text: String) -> Result<(), FanoutError> {
            if self.fail_text {
                return Err(FanoutError::DeliveryFailure("socket reset".into()));
            }
            let _ = self.events.send(Event::Text(text));
            Ok(())
        }
    }

    #[async_trait]
    impl ClientSession for FakeSession {
        async fn send_ping(&mut self) -> Result<(), FanoutError> {
            let _ = self.events.send(Event::Ping);
            Ok(())
        }

        async fn send_pong(&mut self, payload: &[u8]) -> Result<(), FanoutError> {
            let _ = self.events.send(Event::Pong(payload.to_vec()));
            Ok(())
        }

        async fn close_with(self, reason: Option<CloseReason>) {
            let _ = self.events.send(Event::Close(reason));
        }
    }

    /// One driven connection: the client's frame sender and what the server
    /// wrote back.
    struct Client {
        frames: mpsc::Sender<Result<Message, ProtocolError>>,
        events: mpsc::UnboundedReceiver<Event>,
        task: JoinHandle<()>,
    }

    impl Client {
        async fn send(&self, message: Message) {
            self.frames.send(Ok(message)).await.unwrap();
        }

        /// Next non-heartbeat event written to the client.
        async fn next_event(&mut self) -> Event {
            loop {
                let event = timeout(WAIT, self.events.recv())
                    .await
                    .expect("timed out waiting for server event")
                    .expect("event channel closed");
                if event != Event::Ping {
                    return event;
                }
            }
        }

        async fn finished(self) {
            timeout(WAIT, self.task)
                .await
                .expect("connection did not finish")
                .unwrap();
        }
    }

    fn test_state(broker: Arc<dyn MessageBroker>, heartbeat: HeartbeatConfig) -> AppState {
        let config = Config {
            heartbeat,
            ..Config::default()
        };
        AppState::new(Arc::new(config), broker, Handle::current())
    }

    async fn open(state: &AppState, route: Route, query: &str, fail_text: bool) -> Client {
        let connection_id = ConnectionId::new();
        state.sessions.on_open(connection_id, query);
        start(state, connection_id, route, fail_text).await
    }

    async fn start(
        state: &AppState,
        connection_id: ConnectionId,
        route: Route,
        fail_text: bool,
    ) -> Client {
        let outbound = attach(state, route).await.unwrap();
        let (frames, frame_rx) = mpsc::channel(16);
        let (event_tx, events) = mpsc::unbounded_channel();
        let session = FakeSession {
            events: event_tx,
            fail_text,
        };
        let link = Link {
            connection_id,
            route,
        };
        let task = actix_web::rt::spawn(drive(
            state.clone(),
            link,
            session,
            ReceiverStream::new(frame_rx),
            outbound,
        ));
        Client {
            frames,
            events,
            task,
        }
    }

    #[test]
    fn test_route_capabilities() {
        assert!(Route::ChatInbound.accepts_input());
        assert!(Route::ChatDuplex.accepts_input());
        assert!(!Route::ChatOutbound.accepts_input());
        assert!(!Route::Comments.accepts_input());
        assert_eq!(Route::ChatDuplex.label(), "chat_duplex");
    }

    #[test]
    fn test_fragments_reassemble_text() {
        let mut fragments = Fragments::default();
        assert_eq!(fragments.push(Item::FirstText(Bytes::from_static(b"hel"))), Ok(None));
        assert_eq!(fragments.push(Item::Continue(Bytes::from_static(b"lo "))), Ok(None));
        assert_eq!(
            fragments.push(Item::Last(Bytes::from_static(b"room"))),
            Ok(Some("hello room".to_string()))
        );

        // Binary messages complete without producing a line.
        assert_eq!(fragments.push(Item::FirstBinary(Bytes::from_static(b"\x00"))), Ok(None));
        assert_eq!(fragments.push(Item::Last(Bytes::from_static(b"\x01"))), Ok(None));
    }

    #[test]
    fn test_fragments_reject_bad_input() {
        let mut fragments = Fragments::default();
        assert_eq!(
            fragments.push(Item::Last(Bytes::from_static(b"orphan"))),
            Err(CloseCode::Protocol)
        );

        let mut fragments = Fragments::default();
        let full = Bytes::from(vec![b'a'; MAX_FRAGMENTED_MESSAGE]);
        assert_eq!(fragments.push(Item::FirstText(full)), Ok(None));
        assert_eq!(
            fragments.push(Item::Last(Bytes::from_static(b"a"))),
            Err(CloseCode::Size)
        );

        let mut fragments = Fragments::default();
        assert_eq!(fragments.push(Item::FirstText(Bytes::from_static(b"\xff"))), Ok(None));
        assert_eq!(
            fragments.push(Item::Last(Bytes::new())),
            Err(CloseCode::Invalid)
        );
    }

    #[actix_web::test]
    async fn test_client_close_ends_connection() {
        let state = test_state(Arc::new(InMemoryBroker::default()), HeartbeatConfig::default());
        let mut client = open(&state, Route::ChatDuplex, "user=alice", false).await;
        assert_eq!(state.sessions.len(), 1);

        client.send(Message::Ping(Bytes::from_static(b"hb"))).await;
        assert_eq!(client.next_event().await, Event::Pong(b"hb".to_vec()));

        client.send(Message::Close(Some(CloseCode::Normal.into()))).await;
        assert_eq!(
            client.next_event().await,
            Event::Close(Some(CloseCode::Normal.into()))
        );

        client.finished().await;
        assert!(state.sessions.is_empty());
    }

    #[actix_web::test]
    async fn test_duplex_text_is_published_and_delivered() {
        let state = test_state(Arc::new(InMemoryBroker::default()), HeartbeatConfig::default());
        let mut client = open(&state, Route::ChatDuplex, "user=alice", false).await;

        client.send(Message::Text("hi all".into())).await;
        assert_eq!(
            client.next_event().await,
            Event::Text("(alice)(all): hi all".to_string())
        );

        client.send(Message::Close(None)).await;
        assert_eq!(client.next_event().await, Event::Close(None));
        client.finished().await;
    }

    #[actix_web::test]
    async fn test_failed_dispatcher_closes_with_error() {
        let state = test_state(Arc::new(InMemoryBroker::default()), HeartbeatConfig::default());
        let mut client = open(&state, Route::ChatDuplex, "user=alice", true).await;

        // The line loops back through the broker and the write fails.
        client.send(Message::Text("hello".into())).await;

        match client.next_event().await {
            Event::Close(Some(reason)) => assert_eq!(reason.code, CloseCode::Error),
            other => panic!("expected close, got {:?}", other),
        }
        client.finished().await;
        assert!(state.sessions.is_empty());
    }

    #[actix_web::test]
    async fn test_heartbeat_timeout_disconnects() {
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_millis(10),
            client_timeout: Duration::from_millis(40),
        };
        let state = test_state(Arc::new(InMemoryBroker::default()), heartbeat);
        let mut client = open(&state, Route::Comments, "user=alice", false).await;

        let first = timeout(WAIT, client.events.recv()).await.unwrap();
        assert_eq!(first, Some(Event::Ping));

        match client.next_event().await {
            Event::Close(Some(reason)) => {
                assert_eq!(reason.code, CloseCode::Away);
                assert_eq!(reason.description.as_deref(), Some("heartbeat timeout"));
            }
            other => panic!("expected close, got {:?}", other),
        }
        client.finished().await;
        assert!(state.sessions.is_empty());
    }

    #[actix_web::test]
    async fn test_outbound_only_route_ignores_text() {
        let broker = Arc::new(InMemoryBroker::default());
        let state = test_state(broker.clone(), HeartbeatConfig::default());
        let mut published = broker
            .subscribe(&state.config.channels.client_to_broker)
            .await
            .unwrap();
        let mut client = open(&state, Route::ChatOutbound, "user=alice", false).await;

        client.send(Message::Text("hello".into())).await;
        client.send(Message::Close(None)).await;
        assert_eq!(client.next_event().await, Event::Close(None));
        client.finished().await;

        assert!(timeout(Duration::from_millis(100), published.next())
            .await
            .is_err());
    }

    #[actix_web::test]
    async fn test_fragmented_text_is_reassembled() {
        let broker = Arc::new(InMemoryBroker::default());
        let state = test_state(broker.clone(), HeartbeatConfig::default());
        let mut published = broker
            .subscribe(&state.config.channels.client_to_broker)
            .await
            .unwrap();
        let client = open(&state, Route::ChatInbound, "user=alice", false).await;

        client
            .send(Message::Continuation(Item::FirstText(Bytes::from_static(b"@bob "))))
            .await;
        client
            .send(Message::Continuation(Item::Last(Bytes::from_static(b"psst"))))
            .await;

        let raw = timeout(WAIT, published.next()).await.unwrap().unwrap();
        let envelope = BrokerEnvelope::from_json(&raw).unwrap();
        assert_eq!(envelope.user, "alice");
        assert_eq!(envelope.payload, "@bob psst");

        client.send(Message::Close(None)).await;
        client.finished().await;
    }

    #[actix_web::test]
    async fn test_oversized_fragmented_message_closes() {
        let state = test_state(Arc::new(InMemoryBroker::default()), HeartbeatConfig::default());
        let mut client = open(&state, Route::ChatInbound, "user=alice", false).await;

        let chunk = Bytes::from(vec![b'a'; MAX_FRAGMENTED_MESSAGE / 2]);
        client
            .send(Message::Continuation(Item::FirstText(chunk.clone())))
            .await;
        client.send(Message::Continuation(Item::Continue(chunk))).await;
        client
            .send(Message::Continuation(Item::Last(Bytes::from_static(b"a"))))
            .await;

        match client.next_event().await {
            Event::Close(Some(reason)) => assert_eq!(reason.code, CloseCode::Size),
            other => panic!("expected close, got {:?}", other),
        }
        client.finished().await;
    }

    #[actix_web::test]
    async fn test_unregistered_connection_is_closed() {
        let state = test_state(Arc::new(InMemoryBroker::default()), HeartbeatConfig::default());
        let mut client = start(&state, ConnectionId::new(), Route::ChatDuplex, false).await;

        assert_eq!(
            client.next_event().await,
            Event::Close(Some(CloseCode::Error.into()))
        );
        client.finished().await;
        assert!(state.sessions.is_empty());
    }
}
