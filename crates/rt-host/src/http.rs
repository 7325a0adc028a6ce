//! HTTP façade (§4.5): async request/response over the same `reqwest`
//! client the bundle resolver uses, so resolver and guest-visible HTTP
//! errors share one taxonomy. The guest-side linked list of header
//! name/value pairs is decoded into `Vec<(String, String)>` by the FFI
//! bridge before it reaches this façade — this module never walks guest
//! memory directly.
//!
//! Shaped like [`crate::websocket::WebsocketFacade`]: a guest-callable
//! `enqueue` returns a handle immediately and the request runs to
//! completion in the background, landing a closure-handle pair in the
//! event queue the orchestrator drains once per frame, rather than the
//! guest-callable import blocking on the request itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rt_interp::ClosureHandle;

use crate::{Error, Result};

/// A response held host-side until the guest copies it out in bounded
/// chunks (`copy_body_into`) — mirrors the teacher's "response is a handle"
/// design rather than eagerly marshalling the full body across the
/// boundary.
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: bytes::Bytes,
    pub error: Option<String>,
}

impl HttpResponse {
    fn failed(message: String) -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: bytes::Bytes::new(),
            error: Some(message),
        }
    }

    /// Copies up to `guest_buf.len()` bytes of the body starting at
    /// `offset`, returning the number of bytes copied.
    pub fn copy_body_into(&self, offset: usize, guest_buf: &mut [u8]) -> usize {
        let available = self.body.len().saturating_sub(offset);
        let n = available.min(guest_buf.len());
        guest_buf[..n].copy_from_slice(&self.body[offset..offset + n]);
        n
    }
}

/// Drained by the orchestrator once per tick, the same way
/// [`crate::websocket::WsEvent`] is: resolves the request's closure pair via
/// `rt_interp::resolve_pair`.
pub struct HttpEvent {
    pub request_id: u64,
    pub success: ClosureHandle,
    pub error: ClosureHandle,
    pub ok: bool,
}

pub struct HttpFacade {
    client: reqwest::Client,
    request_timeout: Duration,
    responses: Mutex<HashMap<u64, HttpResponse>>,
    events: Mutex<VecDeque<HttpEvent>>,
    next_id: AtomicU64,
}

impl HttpFacade {
    #[must_use]
    pub fn new(client: reqwest::Client, request_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            request_timeout,
            responses: Mutex::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issues the request in the background and returns its handle
    /// immediately; the response (or failure) lands in the event queue once
    /// it resolves.
    pub fn enqueue(
        self: &Arc<Self>,
        method: http::Method,
        url: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        success: ClosureHandle,
        error: ClosureHandle,
    ) -> u64 {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let facade = Arc::clone(self);
        tokio::spawn(async move {
            let ok = match facade.perform(method, &url, &headers, body).await {
                Ok(response) => {
                    facade.responses.lock().insert(request_id, response);
                    true
                }
                Err(e) => {
                    facade.responses.lock().insert(request_id, HttpResponse::failed(e.to_string()));
                    false
                }
            };
            facade.events.lock().push_back(HttpEvent { request_id, success, error, ok });
        });
        request_id
    }

    /// Issues the request and waits for it, honoring the per-request
    /// timeout (§5) via `tokio::time::timeout` rather than `reqwest`'s own
    /// timeout knob, so a hung connect and a hung body read are both
    /// bounded identically. The synchronous half of `enqueue`.
    async fn perform(&self, method: http::Method, url: &str, headers: &[(String, String)], body: Vec<u8>) -> Result<HttpResponse> {
        let mut builder = self.client.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let send = builder.body(body).send();
        let resp = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| Error::Timeout)??;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = tokio::time::timeout(self.request_timeout, resp.bytes())
            .await
            .map_err(|_| Error::Timeout)??;

        Ok(HttpResponse { status, headers, body, error: None })
    }

    pub fn with_response<R>(&self, request_id: u64, f: impl FnOnce(&HttpResponse) -> R) -> Option<R> {
        let responses = self.responses.lock();
        responses.get(&request_id).map(f)
    }

    /// Releases a response handle. Idempotent against an already-released
    /// or unknown handle.
    pub fn release(&self, request_id: u64) {
        self.responses.lock().remove(&request_id);
    }

    /// Drains every queued completion; called once per frame by the
    /// orchestrator.
    pub fn drain_events(&self) -> Vec<HttpEvent> {
        self.events.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_interp::{CallbackKind, ClosureArena};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pair() -> (ClosureArena<&'static str>, ClosureHandle, ClosureHandle) {
        let arena: ClosureArena<&'static str> = ClosureArena::new();
        let success = arena.insert(CallbackKind::Wasm, "ok");
        let error = arena.insert(CallbackKind::Wasm, "err");
        (arena, success, error)
    }

    #[tokio::test]
    async fn enqueue_populates_a_response_and_posts_an_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .mount(&server)
            .await;

        let facade = HttpFacade::new(reqwest::Client::new(), Duration::from_secs(5));
        let (_arena, success, error) = pair();
        let request_id = facade.enqueue(http::Method::GET, format!("{}/ping", server.uri()), Vec::new(), Vec::new(), success, error);

        let mut events = Vec::new();
        while events.is_empty() {
            tokio::task::yield_now().await;
            events = facade.drain_events();
        }
        assert_eq!(events.len(), 1);
        assert!(events[0].ok);
        assert_eq!(events[0].request_id, request_id);

        let (status, copied) = facade
            .with_response(request_id, |resp| {
                let mut buf = vec![0u8; 4];
                let n = resp.copy_body_into(0, &mut buf);
                (resp.status, buf[..n].to_vec())
            })
            .unwrap();
        assert_eq!(status, 200);
        assert_eq!(copied, b"pong");
    }

    #[tokio::test]
    async fn release_makes_the_handle_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let facade = HttpFacade::new(reqwest::Client::new(), Duration::from_secs(5));
        let (_arena, success, error) = pair();
        let request_id = facade.enqueue(http::Method::GET, format!("{}/x", server.uri()), Vec::new(), Vec::new(), success, error);
        while facade.drain_events().is_empty() {
            tokio::task::yield_now().await;
        }
        facade.release(request_id);
        assert!(facade.with_response(request_id, |_| ()).is_none());
    }

    #[tokio::test]
    async fn a_connection_failure_posts_a_failed_response_not_a_panic() {
        let facade = HttpFacade::new(reqwest::Client::new(), Duration::from_millis(200));
        let (_arena, success, error) = pair();
        let request_id = facade.enqueue(http::Method::GET, "http://127.0.0.1:1".to_string(), Vec::new(), Vec::new(), success, error);
        let mut events = Vec::new();
        while events.is_empty() {
            tokio::task::yield_now().await;
            events = facade.drain_events();
        }
        assert!(!events[0].ok);
        facade.with_response(request_id, |resp| assert!(resp.error.is_some())).unwrap();
    }
}
