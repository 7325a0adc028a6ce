//! The event/tick orchestrator (§4.6): owns every subsystem built by the
//! lower crates and drives them through the nine-step frame documented on
//! [`frame`], plus the background/foreground and error-splash state
//! machines that sit around it.
//!
//! Nothing below the orchestrator calls anything above it — façades post
//! completions and the orchestrator drains them, matching the "workers
//! don't call the interpreter" rule the whole stack is built on.

mod app;
mod background;
mod context;
mod frame;
mod imports;
mod restart;
mod runtime;
mod splash;
mod thread_pool;

pub use app::App;
pub use background::BackgroundFlag;
pub use context::AppContext;
pub use frame::{BackgroundState, FrameOutcome};
pub use restart::RestartFlag;
pub use runtime::{Runtime, RuntimeBuilder};
pub use splash::{ErrorSplash, SplashState};
pub use thread_pool::ThreadPool;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// One top-level error per subsystem, so a failure's origin is never lost
/// crossing the orchestrator boundary (§7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bundle/manifest resolution failed: {0}")]
    Resolve(#[from] rt_resolver::Error),
    #[error("interpreter error: {0}")]
    Interp(#[from] rt_interp::Error),
    #[error("host service error: {0}")]
    Host(#[from] rt_host::Error),
    #[error("cache error: {0}")]
    Cache(#[from] rt_cache::Error),
    #[error("config error: {0}")]
    Config(#[from] rt_config::Error),
    #[error("no bundle is mounted and the splash path has no fallback image to show")]
    NoFallbackAvailable,
    #[error("app-init call failed: {0}")]
    AppInitFailed(String),
    #[error("app-shutdown call failed: {0}")]
    AppShutdownFailed(String),
}
