//! The app-context singleton (§3 "App-context"), expanded per the redesign
//! note into an explicit value owned by [`crate::Runtime`] rather than a
//! global. Holds everything that survives a background→foreground cycle:
//! the bus-adjacent façades, the cache, the reporting sink, and the loaded
//! extensions. The render device and canvas context are deliberately absent
//! (§1 non-goal) — only the narrow contract the core needs from them
//! (`app_video_restart_begin/end` brackets) lives here.

use std::sync::Arc;

use rt_host::events::EventRing;
use rt_host::extension::LoadedExtension;
use rt_host::file::FileFacade;
use rt_host::http::HttpFacade;
use rt_host::websocket::WebsocketFacade;
use rt_reporting::Reporter;

use crate::background::BackgroundFlag;
use crate::restart::RestartFlag;
use crate::thread_pool::ThreadPool;

/// Everything a frame needs besides the interpreter and the guest memory
/// handle. Built once by [`crate::RuntimeBuilder`] and threaded through
/// every frame; background/foreground transitions mutate nothing here.
pub struct AppContext {
    pub http: Arc<HttpFacade>,
    pub websocket: Arc<WebsocketFacade>,
    pub events: Arc<EventRing>,
    pub file: Arc<FileFacade>,
    pub reporter: Reporter,
    pub extensions: Vec<LoadedExtension>,
    pub restart: Arc<RestartFlag>,
    pub background: Arc<BackgroundFlag>,
    pub thread_pool: ThreadPool,
}

impl AppContext {
    /// Runs step 4 of the frame (§4.6): ticks every loaded extension. The
    /// vtable's `tick` slot has no failure signal of its own; an extension
    /// that wants to report trouble does so through `reporter`, not a
    /// return value.
    pub fn tick_extensions(&self, dt_ms: u32) {
        for ext in &self.extensions {
            ext.tick(dt_ms);
        }
    }

    /// Step 5: ticks reporting. The reporter itself has no periodic work
    /// today beyond what `capture`/`record_gauge` already do inline; this
    /// exists as the named hook the frame ordering calls for so a future
    /// batched-flush implementation has a home.
    pub fn tick_reporting(&self) {}

    /// Drains every pending WebSocket event, resolving each event's
    /// closure pair through `rt_interp::resolve_pair`. Call once per frame
    /// as part of step 3 ("tick HTTP2/WS").
    pub fn drain_websocket_events(&self) -> Vec<rt_host::websocket::WsEvent> {
        self.websocket.drain_events()
    }

    /// Drains every settled HTTP request, resolving each one's closure pair
    /// the same way `drain_websocket_events` does. Part of step 2 ("drain
    /// HTTP/libcurl callbacks").
    pub fn drain_http_events(&self) -> Vec<rt_host::http::HttpEvent> {
        self.http.drain_events()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rt_config::runtime_config::ReportingConfig;
    use rt_reporting::NoopSink;

    use super::*;

    fn fixture(tmp: &tempfile::TempDir) -> AppContext {
        AppContext {
            http: HttpFacade::new(reqwest::Client::new(), Duration::from_secs(30)),
            websocket: WebsocketFacade::new(Duration::from_secs(30)),
            events: Arc::new(EventRing::new()),
            file: FileFacade::new(tmp.path(), 4.0 * 1024.0 * 1024.0),
            reporter: Reporter::new(ReportingConfig::default(), Box::new(NoopSink)),
            extensions: Vec::new(),
            restart: RestartFlag::new(),
            background: BackgroundFlag::new(),
            thread_pool: ThreadPool::new(4),
        }
    }

    #[test]
    fn tick_extensions_with_none_loaded_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = fixture(&tmp);
        ctx.tick_extensions(16);
    }

    #[test]
    fn drain_websocket_events_with_no_connections_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = fixture(&tmp);
        assert!(ctx.drain_websocket_events().is_empty());
    }

    #[test]
    fn drain_http_events_with_no_requests_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = fixture(&tmp);
        assert!(ctx.drain_http_events().is_empty());
    }
}
