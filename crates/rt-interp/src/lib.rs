//! WASM interpreter abstraction (§4.3) and the FFI bridge (§4.4): one
//! vtable, one active backend, signature-mangled host↔guest calls with
//! guest-offset pointer translation on every boundary crossing.

pub mod bridge;
pub mod closure;
pub mod diagnostics;
pub mod epoch;
pub mod vtable;
mod wasmtime_backend;

pub use closure::{resolve_pair, CallbackKind, ClosureArena, ClosureHandle};
pub use epoch::EpochTicker;
pub use vtable::{ArgKind, CallStatus, LinkerCallback, WasmCallResult, WasmInterpreter, WasmMemory, Word};
pub use wasmtime_backend::WasmtimeInterpreter;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wasm module failed to load: {0}")]
    LoadFailure(#[source] anyhow::Error),
    #[error("linker registration failed: {0}")]
    LinkFailure(#[source] anyhow::Error),
    #[error("guest export {0:?} not found")]
    FunctionNotFound(String),
    #[error("pointer translation out of bounds: offset {0}")]
    PointerOutOfBounds(u32),
    #[error("epoch ticker thread failed to start: {0}")]
    TickerStart(#[source] std::io::Error),
}
