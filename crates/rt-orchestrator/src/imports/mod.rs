//! Guest-callable host imports (§4.4, §4.5) for the façades `rt-host` owns.
//! One submodule per façade, each exposing a `linker_callback` bound into
//! the wasmtime `Linker` the same way [`crate::restart::linker_callback`]
//! binds `app_request_restart`: every argument crosses through
//! `rt_interp::bridge::dispatch`/`dispatch_with_default`, so a guest offset
//! never reaches a façade as a raw pointer.

pub mod events;
pub mod extensions;
pub mod file;
pub mod http;
pub mod websocket;
