//! The fully enumerated record of runtime tunables (§6) and the overlay
//! mechanics that merge defaults, bundle config, manifest, and extension
//! reservations into one frozen `RuntimeConfiguration`.

use serde::{Deserialize, Serialize};

/// `sys_params.guard_page_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPageMode {
    Enabled,
    Minimal,
    Disabled,
}

impl Default for GuardPageMode {
    fn default() -> Self {
        Self::Disabled
    }
}

/// `sys_params.wasm_memory_size`: either the modern object form or the
/// legacy bare scalar, which is treated as `high` with `low = 0` (§9 open
/// question — implementers should warn on the scalar form, which this does
/// at the call site in `rt-resolver` where the manifest is parsed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WasmMemorySize {
    Scalar(u64),
    Object {
        low: u64,
        high: u64,
        allocation_threshold: u64,
    },
}

impl Default for WasmMemorySize {
    fn default() -> Self {
        Self::Object {
            low: 8 * 1024 * 1024,
            high: 64 * 1024 * 1024,
            allocation_threshold: 32 * 1024 * 1024,
        }
    }
}

impl WasmMemorySize {
    /// True when this value came from the legacy bare-scalar form, which
    /// callers should log a warning about.
    #[must_use]
    pub const fn is_legacy_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    #[must_use]
    pub const fn high(&self) -> u64 {
        match self {
            Self::Scalar(v) => *v,
            Self::Object { high, .. } => *high,
        }
    }

    #[must_use]
    pub const fn low(&self) -> u64 {
        match self {
            Self::Scalar(_) => 0,
            Self::Object { low, .. } => *low,
        }
    }
}

macro_rules! reservation_set {
    ($name:ident { $($field:ident),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            $(#[serde(default)] pub $field: u64,)*
        }

        impl $name {
            /// Element-wise maximum, used by the extension-reservation merge
            /// (§4.7's one precedence exception: extensions may raise a
            /// reservation but never lower one).
            #[must_use]
            pub fn max(self, other: Self) -> Self {
                Self {
                    $($field: self.$field.max(other.$field),)*
                }
            }
        }
    };
}

reservation_set!(LowMemoryReservations {
    runtime,
    rhi,
    render_device,
    bundle,
    canvas,
    canvas_font_scratchpad,
    cncbus,
    curl,
    curl_fragment_buffers,
    json_deflate,
    default_thread_pool,
    ssl,
    http2,
    httpx,
    httpx_fragment_buffers,
    reporting,
});

reservation_set!(HighMemoryReservations {
    runtime,
    rhi,
    render_device,
    bundle,
    canvas,
    canvas_font_scratchpad,
    cncbus,
    curl,
    curl_fragment_buffers,
    json_deflate,
    default_thread_pool,
    ssl,
    http2,
    httpx,
    httpx_fragment_buffers,
    reporting,
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReservations {
    #[serde(default)]
    pub low: LowMemoryReservations,
    #[serde(default)]
    pub high: HighMemoryReservations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub suspend_threshold: u32,
    pub warning_delay_ms: u64,
    pub fatal_delay_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            suspend_threshold: 3,
            warning_delay_ms: 5_000,
            fatal_delay_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFetchConfig {
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BundleFetchConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 4,
            retry_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebsocketBackend {
    Http2,
    Websocket,
    Null,
}

impl Default for WebsocketBackend {
    fn default() -> Self {
        Self::Websocket
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketConfig {
    pub ping_timeout: u64,
    pub no_activity_wait_period: u64,
    pub max_handshake_timeout: u64,
    pub max_receivable_message_size: u64,
    pub receive_buffer_size: u64,
    pub send_buffer_size: u64,
    pub header_buffer_size: u64,
    pub maximum_redirects: u32,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            ping_timeout: 10_000,
            no_activity_wait_period: 30_000,
            max_handshake_timeout: 10_000,
            max_receivable_message_size: 16 * 1024 * 1024,
            receive_buffer_size: 64 * 1024,
            send_buffer_size: 64 * 1024,
            header_buffer_size: 8 * 1024,
            maximum_redirects: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdkWebsocketConfig {
    #[serde(default)]
    pub backend: WebsocketBackend,
    #[serde(default)]
    pub websocket_config: WebsocketConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    pub capture_logs: bool,
    pub minimum_event_level: ReportingLevel,
    pub send_queue_size: u32,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            capture_logs: true,
            minimum_event_level: ReportingLevel::Warning,
            send_queue_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodicLogging {
    #[default]
    Disabled,
    Tty,
    Metrics,
    TtyAndMetrics,
}

/// The fully-enumerated, frozen-after-first-init runtime configuration
/// (§3, §6). Built via [`RuntimeConfiguration::resolve`] from the
/// precedence chain: defaults → bundle config → manifest overlay →
/// extension-reservation maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfiguration {
    pub memory_reservations: MemoryReservations,
    pub wasm_memory_size: WasmMemorySize,
    pub guard_page_mode: GuardPageMode,
    pub network_pump_fragment_size: u32,
    pub network_pump_sleep_period_ms: u32,
    pub watchdog: WatchdogConfig,
    pub bundle_fetch: BundleFetchConfig,
    pub coredump_memory_size: u64,
    pub thread_pool_thread_count: u32,
    pub http_max_pooled_connections: u32,
    pub log_input_events: bool,
    pub adk_websocket: AdkWebsocketConfig,
    pub reporting: ReportingConfig,
    pub periodic_logging: PeriodicLogging,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            memory_reservations: MemoryReservations::default(),
            wasm_memory_size: WasmMemorySize::default(),
            guard_page_mode: GuardPageMode::default(),
            network_pump_fragment_size: 16 * 1024,
            network_pump_sleep_period_ms: 10,
            watchdog: WatchdogConfig::default(),
            bundle_fetch: BundleFetchConfig::default(),
            coredump_memory_size: 4 * 1024 * 1024,
            thread_pool_thread_count: 4,
            http_max_pooled_connections: 16,
            log_input_events: false,
            adk_websocket: AdkWebsocketConfig::default(),
            reporting: ReportingConfig::default(),
            periodic_logging: PeriodicLogging::default(),
        }
    }
}

/// A partial runtime-configuration as read from a bundle `.config` file or a
/// manifest's `runtime_config` object: every field optional, `None` meaning
/// "inherit the lower-precedence value".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfigurationOverlay {
    pub memory_reservations: Option<MemoryReservationsOverlay>,
    pub wasm_memory_size: Option<WasmMemorySize>,
    pub guard_page_mode: Option<GuardPageMode>,
    pub network_pump_fragment_size: Option<u32>,
    pub network_pump_sleep_period_ms: Option<u32>,
    pub watchdog: Option<WatchdogConfig>,
    pub bundle_fetch: Option<BundleFetchConfig>,
    pub coredump_memory_size: Option<u64>,
    pub thread_pool_thread_count: Option<u32>,
    pub http_max_pooled_connections: Option<u32>,
    pub log_input_events: Option<bool>,
    pub adk_websocket: Option<AdkWebsocketConfig>,
    pub reporting: Option<ReportingConfig>,
    pub periodic_logging: Option<PeriodicLogging>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MemoryReservationsOverlay {
    pub low: Option<LowMemoryReservations>,
    pub high: Option<HighMemoryReservations>,
}

/// Applies `overlay` on top of `self`, preferring `overlay`'s value wherever
/// it is `Some`.
pub trait Overlay {
    fn overlay(self, overlay: RuntimeConfigurationOverlay) -> Self;
}

impl Overlay for RuntimeConfiguration {
    fn overlay(mut self, overlay: RuntimeConfigurationOverlay) -> Self {
        if let Some(mr) = overlay.memory_reservations {
            if let Some(low) = mr.low {
                self.memory_reservations.low = low;
            }
            if let Some(high) = mr.high {
                self.memory_reservations.high = high;
            }
        }
        if let Some(v) = overlay.wasm_memory_size {
            if v.is_legacy_scalar() {
                tracing::warn!("manifest/bundle config uses legacy scalar wasm_memory_size form");
            }
            self.wasm_memory_size = v;
        }
        macro_rules! set {
            ($field:ident) => {
                if let Some(v) = overlay.$field {
                    self.$field = v;
                }
            };
        }
        set!(guard_page_mode);
        set!(network_pump_fragment_size);
        set!(network_pump_sleep_period_ms);
        set!(watchdog);
        set!(bundle_fetch);
        set!(coredump_memory_size);
        set!(thread_pool_thread_count);
        set!(http_max_pooled_connections);
        set!(log_input_events);
        set!(adk_websocket);
        set!(reporting);
        set!(periodic_logging);
        self
    }
}

impl RuntimeConfiguration {
    /// Resolves the final configuration from the fixed precedence chain
    /// (§3 Runtime-configuration): defaults, then the bundle's embedded
    /// config, then the manifest's overlay.
    #[must_use]
    pub fn resolve(
        bundle_config: Option<RuntimeConfigurationOverlay>,
        manifest_overlay: RuntimeConfigurationOverlay,
    ) -> Self {
        let mut cfg = Self::default();
        if let Some(bundle) = bundle_config {
            cfg = cfg.overlay(bundle);
        }
        cfg.overlay(manifest_overlay)
    }

    /// Applies the one precedence exception: extension-requested numeric
    /// reservations may only raise, never lower, the resolved value.
    #[must_use]
    pub fn raise_reservations(mut self, requested: MemoryReservations) -> Self {
        self.memory_reservations.low = self.memory_reservations.low.max(requested.low);
        self.memory_reservations.high = self.memory_reservations.high.max(requested.high);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_is_manifest_over_bundle_over_defaults() {
        let bundle = RuntimeConfigurationOverlay {
            wasm_memory_size: Some(WasmMemorySize::Object {
                low: 8 * 1024 * 1024,
                high: 8 * 1024 * 1024,
                allocation_threshold: 4 * 1024 * 1024,
            }),
            ..Default::default()
        };
        let manifest = RuntimeConfigurationOverlay {
            wasm_memory_size: Some(WasmMemorySize::Object {
                low: 16 * 1024 * 1024,
                high: 16 * 1024 * 1024,
                allocation_threshold: 8 * 1024 * 1024,
            }),
            ..Default::default()
        };
        let resolved = RuntimeConfiguration::resolve(Some(bundle), manifest);
        assert_eq!(resolved.wasm_memory_size.low(), 16 * 1024 * 1024);
    }

    #[test]
    fn extension_reservation_only_raises() {
        let cfg = RuntimeConfiguration::default();
        let low_before = cfg.memory_reservations.low.runtime;
        let mut requested = MemoryReservations::default();
        requested.low.runtime = low_before + 1;
        let raised = cfg.raise_reservations(requested);
        assert_eq!(raised.memory_reservations.low.runtime, low_before + 1);

        let mut lowering_request = MemoryReservations::default();
        lowering_request.low.runtime = 0;
        let not_lowered = raised.raise_reservations(lowering_request);
        assert_eq!(not_lowered.memory_reservations.low.runtime, low_before + 1);
    }

    #[test]
    fn legacy_scalar_wasm_memory_size_becomes_high_with_zero_low() {
        let v = WasmMemorySize::Scalar(32 * 1024 * 1024);
        assert_eq!(v.high(), 32 * 1024 * 1024);
        assert_eq!(v.low(), 0);
        assert!(v.is_legacy_scalar());
    }
}
