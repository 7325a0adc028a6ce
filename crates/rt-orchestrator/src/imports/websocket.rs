//! `ws_create`/`ws_send`/`ws_close` (§4.5, §4.4): the WebSocket façade's
//! guest-callable imports, completing the drain/demux half `rt-host`
//! already builds. `ws_create`/`ws_send` mint a closure-handle pair from
//! the raw guest contexts exactly like `imports::http`'s `http_request`.
//!
//! Protocols and headers cross the guest boundary as plain delimited
//! strings (comma-separated protocols, newline-separated `name\tvalue`
//! header pairs) rather than a richer wire format — a deliberate
//! simplification, see `DESIGN.md`.

use std::sync::Arc;

use rt_host::websocket::WebsocketFacade;
use rt_interp::bridge::{self, ResolvedArg};
use rt_interp::{CallbackKind, ClosureArena, WasmInterpreter, WasmMemory, Word};

type ClosureContext = u32;

#[must_use]
pub fn linker_callback(
    interp: Arc<dyn WasmInterpreter>,
    facade: Arc<WebsocketFacade>,
    closures: Arc<ClosureArena<ClosureContext>>,
) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        {
            let interp = interp.clone();
            let facade = facade.clone();
            let closures = closures.clone();
            #[allow(clippy::too_many_arguments)]
            linker.func_wrap(
                "env",
                "ws_create",
                move |caller: wasmtime::Caller<'_, _>,
                      url_ptr: u32,
                      url_len: u32,
                      protocols_ptr: u32,
                      protocols_len: u32,
                      headers_ptr: u32,
                      headers_len: u32,
                      success_ctx: u32,
                      error_ctx: u32|
                      -> i64 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "ws_create",
                        &[
                            Word::Pointer(url_ptr),
                            Word::I32(url_len as i32),
                            Word::Pointer(protocols_ptr),
                            Word::I32(protocols_len as i32),
                            Word::Pointer(headers_ptr),
                            Word::I32(headers_len as i32),
                        ],
                        -1i64,
                        |resolved| {
                            let (ResolvedArg::Pointer(url_p), ResolvedArg::Pointer(protocols_p), ResolvedArg::Pointer(headers_p)) =
                                (resolved[0], resolved[2], resolved[4])
                            else {
                                return Err("expected pointer".to_string());
                            };
                            let url = unsafe { bridge::read_guest_str(url_p, url_len) };
                            let protocols = split_list(&unsafe { bridge::read_guest_str(protocols_p, protocols_len) });
                            let headers = decode_pairs(&unsafe { bridge::read_guest_str(headers_p, headers_len) });
                            let success = closures.insert(CallbackKind::Wasm, success_ctx);
                            let error = closures.insert(CallbackKind::Wasm, error_ctx);
                            Ok(facade.create(url, protocols, headers, success, error) as i64)
                        },
                    )
                },
            )?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            let closures = closures.clone();
            linker.func_wrap(
                "env",
                "ws_send",
                move |caller: wasmtime::Caller<'_, _>, connection: u64, data_ptr: u32, data_len: u32, is_text: i32, success_ctx: u32, error_ctx: u32| {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    let _ = bridge::dispatch(
                        interp.as_ref(),
                        memory,
                        "ws_send",
                        &[Word::Pointer(data_ptr), Word::I32(data_len as i32)],
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            let data = unsafe { bridge::read_guest_bytes(ptr, data_len) };
                            let success = closures.insert(CallbackKind::Wasm, success_ctx);
                            let error = closures.insert(CallbackKind::Wasm, error_ctx);
                            facade.send(connection, data, is_text != 0, success, error);
                            Ok(())
                        },
                    );
                },
            )?;
        }
        {
            let facade = facade.clone();
            linker.func_wrap("env", "ws_close", move |_caller: wasmtime::Caller<'_, _>, connection: u64| {
                facade.close(connection);
            })?;
        }
        Ok(())
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn decode_pairs(raw: &str) -> Vec<(String, String)> {
    raw.lines().filter_map(|line| line.split_once('\t')).map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
