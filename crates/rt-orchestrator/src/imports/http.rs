//! `http_request`/`http_status`/`http_copy_body`/`http_release` (§4.5): the
//! HTTP façade's guest-callable imports. `http_request` mirrors
//! `HttpFacade::enqueue`'s fire-and-forget shape: it mints a closure-handle
//! pair from the raw guest contexts and returns a request id immediately,
//! the response itself lands later through `AppContext::drain_http_events`.
//!
//! Headers and the method name cross the guest boundary as plain strings
//! rather than a richer wire format (a deliberate simplification, see
//! `DESIGN.md`): headers are newline-separated `name\tvalue` pairs.

use std::sync::Arc;

use rt_host::http::HttpFacade;
use rt_interp::bridge::{self, ResolvedArg};
use rt_interp::{CallbackKind, ClosureArena, WasmInterpreter, WasmMemory, Word};

type ClosureContext = u32;

#[must_use]
pub fn linker_callback(
    interp: Arc<dyn WasmInterpreter>,
    facade: Arc<HttpFacade>,
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
                "http_request",
                move |caller: wasmtime::Caller<'_, _>,
                      method_ptr: u32,
                      method_len: u32,
                      url_ptr: u32,
                      url_len: u32,
                      headers_ptr: u32,
                      headers_len: u32,
                      body_ptr: u32,
                      body_len: u32,
                      success_ctx: u32,
                      error_ctx: u32|
                      -> i64 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "http_request",
                        &[
                            Word::Pointer(method_ptr),
                            Word::I32(method_len as i32),
                            Word::Pointer(url_ptr),
                            Word::I32(url_len as i32),
                            Word::Pointer(headers_ptr),
                            Word::I32(headers_len as i32),
                            Word::Pointer(body_ptr),
                            Word::I32(body_len as i32),
                        ],
                        -1i64,
                        |resolved| {
                            let (
                                ResolvedArg::Pointer(method_p),
                                ResolvedArg::Pointer(url_p),
                                ResolvedArg::Pointer(headers_p),
                                ResolvedArg::Pointer(body_p),
                            ) = (resolved[0], resolved[2], resolved[4], resolved[6])
                            else {
                                return Err("expected pointer".to_string());
                            };
                            let method = unsafe { bridge::read_guest_str(method_p, method_len) }
                                .parse::<http::Method>()
                                .map_err(|e| e.to_string())?;
                            let url = unsafe { bridge::read_guest_str(url_p, url_len) };
                            let headers = decode_headers(&unsafe { bridge::read_guest_str(headers_p, headers_len) });
                            let body = unsafe { bridge::read_guest_bytes(body_p, body_len) };
                            let success = closures.insert(CallbackKind::Wasm, success_ctx);
                            let error = closures.insert(CallbackKind::Wasm, error_ctx);
                            Ok(facade.enqueue(method, url, headers, body, success, error) as i64)
                        },
                    )
                },
            )?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap(
                "env",
                "http_status",
                move |caller: wasmtime::Caller<'_, _>, request_id: u64| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(interp.as_ref(), memory, "http_status", &[], -1i32, |_resolved| {
                        facade
                            .with_response(request_id, |resp| i32::from(resp.status))
                            .ok_or_else(|| "unknown request id".to_string())
                    })
                },
            )?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap(
                "env",
                "http_copy_body",
                move |caller: wasmtime::Caller<'_, _>, request_id: u64, offset: u32, buf_ptr: u32, buf_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "http_copy_body",
                        &[Word::Pointer(buf_ptr), Word::I32(buf_len as i32)],
                        -1i32,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            facade
                                .with_response(request_id, |resp| {
                                    let mut buf = vec![0u8; buf_len as usize];
                                    let n = resp.copy_body_into(offset as usize, &mut buf);
                                    unsafe { bridge::write_guest_bytes(ptr, buf_len, &buf[..n]) as i32 }
                                })
                                .ok_or_else(|| "unknown request id".to_string())
                        },
                    )
                },
            )?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap("env", "http_release", move |caller: wasmtime::Caller<'_, _>, request_id: u64| {
                let memory = WasmMemory::from_raw(caller.data().memory_id());
                let _ = bridge::dispatch(interp.as_ref(), memory, "http_release", &[], |_resolved| {
                    facade.release(request_id);
                    Ok(())
                });
            })?;
        }
        Ok(())
    })
}

fn decode_headers(raw: &str) -> Vec<(String, String)> {
    raw.lines().filter_map(|line| line.split_once('\t')).map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
