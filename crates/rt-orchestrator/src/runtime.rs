//! `Runtime`/`RuntimeBuilder` (§3 App-context, §4.6): boots a persona into a
//! mounted, running guest module and drives the nine-step frame.
//!
//! Expanded per the redesign note against a global App-context singleton:
//! `Runtime` is an explicit value `RuntimeBuilder` constructs once and the
//! caller (ultimately `rt-cli`) owns for the process lifetime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rt_cache::Cache;
use rt_config::manifest::Selector;
use rt_config::runtime_config::RuntimeConfiguration;
use rt_config::DeviceMetrics;
use rt_host::events::EventRing;
use rt_host::extension::{self, merge_reservations};
use rt_host::file::FileFacade;
use rt_host::http::HttpFacade;
use rt_host::websocket::{WebsocketFacade, WsEvent};
use rt_interp::{ClosureArena, WasmInterpreter, WasmMemory, WasmtimeInterpreter};
use rt_reporting::{NoopSink, ReportSink, Reporter};
use rt_resolver::{BundleHandle, Resolver};

use crate::app::App;
use crate::background::{self, BackgroundFlag};
use crate::context::AppContext;
use crate::frame::{background_sleep_interval, clamp_dt_ms, BackgroundState, FrameOutcome};
use crate::imports;
use crate::restart::{self, RestartFlag};
use crate::splash::ErrorSplash;
use crate::thread_pool::ThreadPool;
use crate::{Error, Result};

/// The guest-context word the host hands back on every closure invocation
/// (§4.4): the arena's entries are just this opaque value, since the guest
/// side already knows what to do with it once the fixed demux export
/// receives it back.
type ClosureContext = u32;

const DEMUX_EXPORT: &str = "sb_invoke_closure";

pub struct RuntimeBuilder {
    persona_file_json: String,
    persona_id: String,
    partner: String,
    partner_guid: String,
    device_metrics: DeviceMetrics,
    signing_key_base64: String,
    cache_dir: PathBuf,
    extensions_dir: Option<PathBuf>,
    file_root: PathBuf,
    sink: Box<dyn ReportSink>,
    request_timeout: Duration,
    file_bytes_per_second: f64,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, file_root: impl Into<PathBuf>) -> Self {
        Self {
            persona_file_json: String::new(),
            persona_id: String::new(),
            partner: String::new(),
            partner_guid: String::new(),
            device_metrics: DeviceMetrics::default(),
            signing_key_base64: String::new(),
            cache_dir: cache_dir.into(),
            extensions_dir: None,
            file_root: file_root.into(),
            sink: Box::new(NoopSink),
            request_timeout: Duration::from_secs(30),
            file_bytes_per_second: 4.0 * 1024.0 * 1024.0,
        }
    }

    #[must_use]
    pub fn persona(mut self, persona_file_json: impl Into<String>, persona_id: impl Into<String>) -> Self {
        self.persona_file_json = persona_file_json.into();
        self.persona_id = persona_id.into();
        self
    }

    #[must_use]
    pub fn partner(mut self, partner: impl Into<String>, partner_guid: impl Into<String>) -> Self {
        self.partner = partner.into();
        self.partner_guid = partner_guid.into();
        self
    }

    #[must_use]
    pub fn device_metrics(mut self, device_metrics: DeviceMetrics) -> Self {
        self.device_metrics = device_metrics;
        self
    }

    #[must_use]
    pub fn signing_key_base64(mut self, key: impl Into<String>) -> Self {
        self.signing_key_base64 = key.into();
        self
    }

    #[must_use]
    pub fn extensions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extensions_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resolves the persona's bundle, loads its WASM module, links host and
    /// extension imports, and runs the guest's `initialize` export. On any
    /// failure this returns `Err` with the splash already computed so the
    /// caller can render it without re-deriving the failure from scratch.
    pub async fn build(self, selector: &dyn Selector) -> std::result::Result<Runtime, (Error, ErrorSplash)> {
        match self.build_inner(selector).await {
            Ok(runtime) => Ok(runtime),
            Err((e, fallback_message)) => {
                let message = fallback_message.unwrap_or_else(|| e.to_string());
                let splash = ErrorSplash::for_failure(None, message);
                Err((e, splash))
            }
        }
    }

    /// Errors carry the persona's configured fallback message (§4.2 step 1,
    /// §4.9) once it is known, i.e. once persona lookup has succeeded; a
    /// failure at or before that point has no such message and falls back
    /// to the raw error text in [`Self::build`].
    async fn build_inner(self, selector: &dyn Selector) -> std::result::Result<Runtime, (Error, Option<String>)> {
        let http_client = Self::http_client(self.request_timeout).map_err(|e| (e, None))?;
        let cache = Cache::new(self.cache_dir.clone());
        let resolver = Resolver::new(http_client.clone(), cache, self.signing_key_base64.clone());

        let resolved = resolver
            .resolve(
                &self.persona_file_json,
                &self.persona_id,
                &self.partner,
                &self.partner_guid,
                &self.device_metrics,
                selector,
            )
            .await
            .map_err(|e| (Error::from(e), None))?;
        let fallback_message = resolved.fallback_error_message.clone();

        let wasm_bytes = resolved
            .handle
            .read_wasm()
            .map_err(|e| (Error::from(e), Some(fallback_message.clone())))?;
        self.assemble(http_client, wasm_bytes, resolved.config, Some(resolved.handle))
            .await
            .map_err(|e| (e, Some(fallback_message)))
    }

    /// The `--wasm`/`--config` path (§6): loads a module straight off disk,
    /// skipping persona/manifest resolution and signature verification
    /// entirely. `config_overlay` is the parsed `--config FILE`, applied over
    /// the built-in defaults with no bundle or manifest layer beneath it.
    pub async fn build_from_wasm_file(
        self,
        wasm_path: impl Into<PathBuf>,
        config_overlay: Option<rt_config::runtime_config::RuntimeConfigurationOverlay>,
    ) -> std::result::Result<Runtime, (Error, ErrorSplash)> {
        match self.build_from_wasm_file_inner(wasm_path.into(), config_overlay).await {
            Ok(runtime) => Ok(runtime),
            Err(e) => {
                let splash = ErrorSplash::for_failure(None, e.to_string());
                Err((e, splash))
            }
        }
    }

    async fn build_from_wasm_file_inner(
        self,
        wasm_path: PathBuf,
        config_overlay: Option<rt_config::runtime_config::RuntimeConfigurationOverlay>,
    ) -> Result<Runtime> {
        let http_client = Self::http_client(self.request_timeout)?;
        let wasm_bytes = std::fs::read(&wasm_path).map_err(rt_resolver::Error::from)?;
        let config = RuntimeConfiguration::resolve(None, config_overlay.unwrap_or_default());
        self.assemble(http_client, wasm_bytes, config, None).await
    }

    fn http_client(timeout: Duration) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(rt_host::Error::from)?;
        Ok(client)
    }

    /// Shared tail of both boot paths: extension discovery, reservation
    /// raising, interpreter load, host-context assembly, and the guest's
    /// `initialize` export. `bundle` is `None` for the bare-WASM path, since
    /// there is nothing to unmount at shutdown in that case.
    async fn assemble(
        self,
        http_client: reqwest::Client,
        wasm_bytes: Vec<u8>,
        resolved_config: RuntimeConfiguration,
        bundle: Option<BundleHandle>,
    ) -> Result<Runtime> {
        let extensions = match &self.extensions_dir {
            Some(dir) => extension::discover(dir)?,
            None => Vec::new(),
        };
        let requested = merge_reservations(rt_config::runtime_config::MemoryReservations::default(), &extensions);
        let config: RuntimeConfiguration = resolved_config.raise_reservations(requested);

        let interp = Arc::new(WasmtimeInterpreter::new(&config.watchdog)?);
        let interp_dyn: Arc<dyn WasmInterpreter> = interp.clone();
        let restart_flag = RestartFlag::new();
        let background_flag = BackgroundFlag::new();
        let closures = Arc::new(ClosureArena::new());

        let http_facade = HttpFacade::new(http_client, self.request_timeout);
        let websocket_facade = WebsocketFacade::new(self.request_timeout);
        let file_facade = FileFacade::new(self.file_root, self.file_bytes_per_second);
        let event_ring = Arc::new(EventRing::new());

        interp.register_linker(restart::linker_callback(Arc::clone(&restart_flag)));
        interp.register_linker(background::linker_callback(Arc::clone(&background_flag)));
        interp.register_linker(imports::file::linker_callback(interp_dyn.clone(), file_facade.clone()));
        interp.register_linker(imports::http::linker_callback(interp_dyn.clone(), http_facade.clone(), closures.clone()));
        interp.register_linker(imports::websocket::linker_callback(interp_dyn.clone(), websocket_facade.clone(), closures.clone()));
        interp.register_linker(imports::events::linker_callback(interp_dyn.clone(), event_ring.clone()));
        for ext in &extensions {
            interp.register_linker(imports::extensions::linker_callback(ext.linker_bindings()));
        }

        let memory = interp.load(&wasm_bytes, config.wasm_memory_size.low(), config.wasm_memory_size.high())?;

        for ext in &extensions {
            if let Err(code) = ext.startup() {
                tracing::warn!(extension = ext.name(), code, "extension startup failed");
            }
        }

        let context = AppContext {
            http: http_facade,
            websocket: websocket_facade,
            events: event_ring,
            file: file_facade,
            reporter: Reporter::new(config.reporting, self.sink),
            extensions,
            restart: restart_flag,
            background: background_flag,
            thread_pool: ThreadPool::new(config.thread_pool_thread_count.max(1) as usize * 4),
        };

        let runtime = Runtime {
            interp,
            memory,
            context,
            config,
            bundle,
            background: BackgroundState::Foreground,
            last_time_ms: 0,
            closures,
            splash: ErrorSplash::none(),
        };

        runtime.app().initialize()?;
        Ok(runtime)
    }
}

/// A booted, running guest module plus every subsystem that outlives a
/// single frame.
pub struct Runtime {
    interp: Arc<WasmtimeInterpreter>,
    memory: WasmMemory,
    context: AppContext,
    config: RuntimeConfiguration,
    bundle: Option<BundleHandle>,
    background: BackgroundState,
    last_time_ms: i64,
    closures: Arc<ClosureArena<ClosureContext>>,
    splash: ErrorSplash,
}

impl Runtime {
    #[must_use]
    pub fn app(&self) -> App<'_> {
        App::new(self.interp.as_ref(), self.memory)
    }

    #[must_use]
    pub const fn context(&self) -> &AppContext {
        &self.context
    }

    #[must_use]
    pub const fn config(&self) -> &RuntimeConfiguration {
        &self.config
    }

    #[must_use]
    pub const fn background_state(&self) -> BackgroundState {
        self.background
    }

    /// Runs the nine-step frame (§4.6) once. `now_ms` is the caller's
    /// wall-clock reading for this frame (a real clock outside tests, a
    /// scripted sequence inside them).
    pub async fn run_frame(&mut self, now_ms: i64) -> Result<FrameOutcome> {
        // 1. Drain thread-pool completion callbacks.
        self.context.thread_pool.drain();

        // 2. Drain HTTP/libcurl callbacks: every settled request resolves
        // its closure pair here.
        for event in self.context.drain_http_events() {
            self.invoke_pair((event.success, event.error), event.ok);
        }

        // 3. Tick HTTP2/WS: drain every pending WebSocket event and resolve
        // its closure pair, if any, back into the guest.
        for event in self.context.drain_websocket_events() {
            self.dispatch_websocket_event(event);
        }

        // 4. Tick loaded extensions.
        self.context.tick_extensions(clamp_dt_ms(now_ms, self.last_time_ms));

        // 5. Tick reporting.
        self.context.tick_reporting();

        // 6. `sb_tick` fills the event ring; Δt is computed from the last
        // time event, clamped to 1000ms. This core does not implement the
        // guest-visible event ring population itself (events arrive via
        // `rt_host::events::EventRing::push_input`/`push_time` from the
        // platform's input source, out of scope per §1); Δt is instead
        // computed directly from the caller-supplied clock reading.
        let dt_ms = clamp_dt_ms(now_ms, self.last_time_ms);
        self.last_time_ms = now_ms;
        self.context.events.push_time(now_ms.max(0) as u64, u64::from(dt_ms));

        // 7. Advance the file-write drain budget by Δt × bytes_per_second.
        self.context.file.budget().advance(f64::from(dt_ms) / 1000.0);

        // 8. Backgrounded: sleep to cap at 2Hz. Foreground: call
        // `app_tick`. Canvas begin/end and present are a non-goal (§1); the
        // guest tick is still the one required call.
        if self.background == BackgroundState::Backgrounded {
            tokio::time::sleep(background_sleep_interval()).await;
        } else {
            self.app().tick(now_ms, dt_ms, 0)?;
        }

        // 9. Check restart/background/foreground flags.
        if self.context.restart.take() {
            return Ok(FrameOutcome::RestartRequested);
        }
        if self.context.background.take_background() {
            return Ok(FrameOutcome::BackgroundRequested);
        }
        if self.context.background.take_foreground() {
            return Ok(FrameOutcome::ForegroundRequested);
        }
        Ok(FrameOutcome::Continue)
    }

    fn dispatch_websocket_event(&self, event: WsEvent) {
        match event {
            WsEvent::Opened { success, error, .. } => self.invoke_pair((success, error), true),
            WsEvent::OpenFailed { success, error, .. } => self.invoke_pair((success, error), false),
            WsEvent::SendResult { success, error, ok, .. } => self.invoke_pair((success, error), ok),
            WsEvent::Message { .. } | WsEvent::Closed { .. } => {
                // No closure pair attached; the guest observes these
                // through `read_events`/polling the connection state
                // instead of a one-shot callback.
            }
        }
    }

    fn invoke_pair(&self, pair: (rt_interp::ClosureHandle, rt_interp::ClosureHandle), invoke_first: bool) {
        if let Some(ctx) = rt_interp::resolve_pair(&self.closures, pair, invoke_first) {
            let result = self.interp.call_i(self.memory, DEMUX_EXPORT, ctx as i32);
            if !result.is_success() {
                tracing::warn!(ctx, details = %result.details, "closure demux call failed");
            }
        }
    }

    /// Backgrounding (§4.6): tears down the render device and canvas
    /// context (a non-goal in this core, so there is nothing to actually
    /// release) while the bus, HTTP, thread pool, and reporting stay alive.
    pub fn enter_background(&mut self) {
        self.background = BackgroundState::Backgrounded;
    }

    pub fn enter_foreground(&mut self) {
        self.background = BackgroundState::Foreground;
    }

    /// A video-mode restart: brackets a full render-device teardown/rebuild
    /// with the guest-exported restart hooks. The render device itself is
    /// out of scope here; only the guest-visible contract is driven.
    pub fn video_mode_restart(&self) -> Result<()> {
        self.app().video_restart_begin()?;
        self.app().video_restart_end()?;
        Ok(())
    }

    /// Blocks until every outstanding thread-pool worker has posted its
    /// completion (§5 suspension point), then runs the guest's `shutdown`
    /// export and unloads the module.
    pub async fn shutdown(mut self) -> Result<()> {
        self.context.thread_pool.drain_until_idle().await;
        for ext in &self.context.extensions {
            ext.shutdown();
        }
        self.app().shutdown()?;
        self.interp.unload(self.memory)?;
        if let Some(bundle) = self.bundle.take() {
            bundle.unmount();
        }
        Ok(())
    }
}
