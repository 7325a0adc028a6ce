//! The guest's WebSocket façade (§4.5, §4.4): `create`, `send`,
//! `begin_read`/`end_read`, `close`, over `tokio-tungstenite`. Grounded on
//! the teacher's `outgoing_websocket` bindgen module (split write/read
//! streams backed by channels, a background task that owns the socket) but
//! reshaped around closure-handle pairs instead of WASI `Resource`s: each
//! `create`/`send` call is handed a success/error pair, and exactly one of
//! the pair is ever resolved (§4.4's drop-the-other-one invariant), via
//! `rt_interp::resolve_pair`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rt_interp::ClosureHandle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

/// Connection lifecycle (§3's "Websocket / HTTP request handle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connecting,
    Connected,
    ClosingByUser,
    ClosedByPeer,
    Failed,
}

/// Drained by the orchestrator once per tick; each variant carries the
/// closure-handle pair (if any) that must be resolved via
/// `rt_interp::resolve_pair` to honor "exactly one of success/error fires".
pub enum WsEvent {
    Opened {
        connection: u64,
        success: ClosureHandle,
        error: ClosureHandle,
    },
    OpenFailed {
        connection: u64,
        success: ClosureHandle,
        error: ClosureHandle,
        message: String,
    },
    Message {
        connection: u64,
        data: Vec<u8>,
        is_text: bool,
    },
    SendResult {
        connection: u64,
        success: ClosureHandle,
        error: ClosureHandle,
        ok: bool,
        message: String,
    },
    Closed {
        connection: u64,
    },
}

struct Connection {
    state: Mutex<WsState>,
    write_tx: mpsc::UnboundedSender<Message>,
}

/// Owns every live socket and the event queue the orchestrator drains each
/// tick (mirrors "workers post completions, the orchestrator drives the
/// guest" rather than a background task invoking guest closures directly).
pub struct WebsocketFacade {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    events: Mutex<VecDeque<WsEvent>>,
    next_id: AtomicU64,
    connect_timeout: Duration,
}

impl WebsocketFacade {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            connect_timeout,
        })
    }

    /// Opens a connection in the background and returns its handle
    /// immediately; `Opened`/`OpenFailed` lands in the event queue once the
    /// handshake resolves.
    pub fn create(
        self: &Arc<Self>,
        url: String,
        protocols: Vec<String>,
        headers: Vec<(String, String)>,
        success: ClosureHandle,
        error: ClosureHandle,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        self.connections.lock().insert(
            id,
            Arc::new(Connection {
                state: Mutex::new(WsState::Connecting),
                write_tx,
            }),
        );

        let facade = Arc::clone(self);
        let timeout = self.connect_timeout;
        tokio::spawn(async move {
            match facade.connect(&url, &protocols, &headers, timeout).await {
                Ok((sink, stream)) => {
                    facade.set_state(id, WsState::Connected);
                    facade.push_event(WsEvent::Opened { connection: id, success, error });
                    facade.spawn_writer(id, sink, write_rx);
                    facade.run_reader(id, stream).await;
                }
                Err(message) => {
                    facade.set_state(id, WsState::Failed);
                    facade.connections.lock().remove(&id);
                    facade.push_event(WsEvent::OpenFailed { connection: id, success, error, message });
                }
            }
        });
        id
    }

    async fn connect(
        &self,
        url: &str,
        protocols: &[String],
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<
        (
            futures::stream::SplitSink<
                tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
                Message,
            >,
            futures::stream::SplitStream<
                tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
            >,
        ),
        String,
    > {
        let mut request = url.into_client_request().map_err(|e| e.to_string())?;
        for (name, value) in headers {
            let name = name.parse::<http::HeaderName>().map_err(|e| e.to_string())?;
            let value = value.parse::<http::HeaderValue>().map_err(|e| e.to_string())?;
            request.headers_mut().insert(name, value);
        }
        if !protocols.is_empty() {
            let joined = protocols.join(", ");
            let value = http::HeaderValue::from_str(&joined).map_err(|e| e.to_string())?;
            request.headers_mut().insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| "connect timed out".to_string())?
            .map_err(|e| e.to_string())?;
        Ok(stream.split())
    }

    fn spawn_writer(
        self: &Arc<Self>,
        connection: u64,
        mut sink: futures::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
            Message,
        >,
        mut write_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() {
                    break;
                }
                if is_close {
                    break;
                }
            }
        });
        let _ = connection;
    }

    async fn run_reader(
        self: &Arc<Self>,
        connection: u64,
        mut stream: futures::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        >,
    ) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.push_event(WsEvent::Message {
                        connection,
                        data: text.as_bytes().to_vec(),
                        is_text: true,
                    });
                }
                Ok(Message::Binary(data)) => {
                    self.push_event(WsEvent::Message {
                        connection,
                        data: data.to_vec(),
                        is_text: false,
                    });
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            }
        }
        let was_closing_by_user = self.state_of(connection) == Some(WsState::ClosingByUser);
        if !was_closing_by_user {
            self.set_state(connection, WsState::ClosedByPeer);
        }
        self.connections.lock().remove(&connection);
        self.push_event(WsEvent::Closed { connection });
    }

    /// Sends one message; reports the outcome as a `SendResult` event
    /// rather than synchronously, so every closure resolution goes through
    /// the same drained-by-the-orchestrator path.
    pub fn send(&self, connection: u64, data: Vec<u8>, is_text: bool, success: ClosureHandle, error: ClosureHandle) {
        let conn = self.connections.lock().get(&connection).cloned();
        let Some(conn) = conn else {
            self.push_event(WsEvent::SendResult {
                connection,
                success,
                error,
                ok: false,
                message: "connection does not exist".to_string(),
            });
            return;
        };
        let message = if is_text {
            match String::from_utf8(data) {
                Ok(text) => Message::Text(text.into()),
                Err(_) => {
                    self.push_event(WsEvent::SendResult {
                        connection,
                        success,
                        error,
                        ok: false,
                        message: "text message is not valid utf-8".to_string(),
                    });
                    return;
                }
            }
        } else {
            Message::Binary(data.into())
        };
        let ok = conn.write_tx.send(message).is_ok();
        self.push_event(WsEvent::SendResult {
            connection,
            success,
            error,
            ok,
            message: if ok { String::new() } else { "connection is closed".to_string() },
        });
    }

    /// Marks the connection closing and sends a close frame; no further
    /// events are emitted for it afterward (§4.5: "close(handle) releases
    /// the handle after a final state transition").
    pub fn close(&self, connection: u64) {
        let conn = self.connections.lock().remove(&connection);
        if let Some(conn) = conn {
            *conn.state.lock() = WsState::ClosingByUser;
            let _ = conn.write_tx.send(Message::Close(None));
        }
    }

    #[must_use]
    pub fn state_of(&self, connection: u64) -> Option<WsState> {
        self.connections.lock().get(&connection).map(|c| *c.state.lock())
    }

    fn set_state(&self, connection: u64, state: WsState) {
        if let Some(conn) = self.connections.lock().get(&connection) {
            *conn.state.lock() = state;
        }
    }

    fn push_event(&self, event: WsEvent) {
        self.events.lock().push_back(event);
    }

    /// Drains every queued event; called once per frame by the
    /// orchestrator (mirrors HTTP/thread-pool callback draining, §4.6
    /// steps 1-2).
    pub fn drain_events(&self) -> Vec<WsEvent> {
        self.events.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_interp::{CallbackKind, ClosureArena};

    #[test]
    fn send_against_unknown_connection_reports_failure_event() {
        let facade = WebsocketFacade::new(Duration::from_secs(5));
        let arena: ClosureArena<&'static str> = ClosureArena::new();
        let success = arena.insert(CallbackKind::Wasm, "ok");
        let error = arena.insert(CallbackKind::Wasm, "err");
        facade.send(999, b"hi".to_vec(), true, success, error);
        let events = facade.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            WsEvent::SendResult { ok, .. } => assert!(!ok),
            _ => panic!("expected SendResult"),
        }
    }

    #[test]
    fn close_on_unknown_connection_is_a_no_op() {
        let facade = WebsocketFacade::new(Duration::from_secs(5));
        facade.close(42);
        assert!(facade.drain_events().is_empty());
    }

    #[test]
    fn state_of_unknown_connection_is_none() {
        let facade = WebsocketFacade::new(Duration::from_secs(5));
        assert_eq!(facade.state_of(7), None);
    }
}
