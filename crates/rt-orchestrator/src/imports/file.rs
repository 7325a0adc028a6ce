//! `fs_open`/`fs_close`/`fs_read`/`fs_write`/`fs_stat`/`fs_delete`/
//! `fs_mkdirs`/`fs_rename` (§4.5): the storage façade's guest-callable
//! imports. Grounded on `sb_fopen`/`sb_fclose`/`sb_fread`/`sb_fwrite` in
//! `examples/original_source/source/adk/extender/generated/extension/ffi.c`
//! and bound the same way `restart::linker_callback` binds
//! `app_request_restart`: one `func_wrap` per symbol, every pointer argument
//! going through `rt_interp::bridge::dispatch_with_default` before
//! `FileFacade` ever sees it.

use std::sync::Arc;

use rt_host::file::FileFacade;
use rt_interp::bridge::{self, ResolvedArg};
use rt_interp::{WasmInterpreter, WasmMemory, Word};

#[must_use]
pub fn linker_callback(interp: Arc<dyn WasmInterpreter>, facade: Arc<FileFacade>) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap(
                "env",
                "fs_open",
                move |caller: wasmtime::Caller<'_, _>, path_ptr: u32, path_len: u32| -> i64 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_open",
                        &[Word::Pointer(path_ptr), Word::I32(path_len as i32)],
                        -1i64,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            let path = unsafe { bridge::read_guest_str(ptr, path_len) };
                            facade.open(&path).map(|h| h as i64).map_err(|e| e.to_string())
                        },
                    )
                },
            )?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap("env", "fs_close", move |caller: wasmtime::Caller<'_, _>, handle: u64| {
                let memory = WasmMemory::from_raw(caller.data().memory_id());
                let _ = bridge::dispatch(interp.as_ref(), memory, "fs_close", &[Word::I64(handle as i64)], |_resolved| {
                    facade.close(handle);
                    Ok(())
                });
            })?;
        }
        {
            let interp = interp.clone();
            let facade = facade.clone();
            linker.func_wrap(
                "env",
                "fs_read",
                move |caller: wasmtime::Caller<'_, _>, handle: u64, buf_ptr: u32, buf_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_read",
                        &[Word::I64(handle as i64), Word::Pointer(buf_ptr), Word::I32(buf_len as i32)],
                        -1i32,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[1] else {
                                return Err("expected pointer".to_string());
                            };
                            let bytes = facade.read(handle).map_err(|e| e.to_string())?;
                            let written = unsafe { bridge::write_guest_bytes(ptr, buf_len, &bytes) };
                            Ok(written as i32)
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
                "fs_write",
                move |caller: wasmtime::Caller<'_, _>, handle: u64, buf_ptr: u32, buf_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_write",
                        &[Word::I64(handle as i64), Word::Pointer(buf_ptr), Word::I32(buf_len as i32)],
                        -1i32,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[1] else {
                                return Err("expected pointer".to_string());
                            };
                            let bytes = unsafe { bridge::read_guest_bytes(ptr, buf_len) };
                            let len = bytes.len();
                            facade.write(handle, &bytes).map_err(|e| e.to_string())?;
                            Ok(len as i32)
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
                "fs_stat",
                move |caller: wasmtime::Caller<'_, _>, path_ptr: u32, path_len: u32| -> i64 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_stat",
                        &[Word::Pointer(path_ptr), Word::I32(path_len as i32)],
                        -1i64,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            let path = unsafe { bridge::read_guest_str(ptr, path_len) };
                            match facade.stat(&path).map_err(|e| e.to_string())? {
                                Some(size) => Ok(size as i64),
                                None => Ok(-1),
                            }
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
                "fs_delete",
                move |caller: wasmtime::Caller<'_, _>, path_ptr: u32, path_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_delete",
                        &[Word::Pointer(path_ptr), Word::I32(path_len as i32)],
                        -1i32,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            let path = unsafe { bridge::read_guest_str(ptr, path_len) };
                            facade.delete(&path).map(|()| 0).map_err(|e| e.to_string())
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
                "fs_mkdirs",
                move |caller: wasmtime::Caller<'_, _>, path_ptr: u32, path_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_mkdirs",
                        &[Word::Pointer(path_ptr), Word::I32(path_len as i32)],
                        -1i32,
                        |resolved| {
                            let ResolvedArg::Pointer(ptr) = resolved[0] else {
                                return Err("expected pointer".to_string());
                            };
                            let path = unsafe { bridge::read_guest_str(ptr, path_len) };
                            facade.mkdirs(&path).map(|()| 0).map_err(|e| e.to_string())
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
                "fs_rename",
                move |caller: wasmtime::Caller<'_, _>, from_ptr: u32, from_len: u32, to_ptr: u32, to_len: u32| -> i32 {
                    let memory = WasmMemory::from_raw(caller.data().memory_id());
                    bridge::dispatch_with_default(
                        interp.as_ref(),
                        memory,
                        "fs_rename",
                        &[
                            Word::Pointer(from_ptr),
                            Word::I32(from_len as i32),
                            Word::Pointer(to_ptr),
                            Word::I32(to_len as i32),
                        ],
                        -1i32,
                        |resolved| {
                            let (ResolvedArg::Pointer(from_ptr), ResolvedArg::Pointer(to_ptr)) = (resolved[0], resolved[2]) else {
                                return Err("expected pointer".to_string());
                            };
                            let from = unsafe { bridge::read_guest_str(from_ptr, from_len) };
                            let to = unsafe { bridge::read_guest_str(to_ptr, to_len) };
                            facade.rename(&from, &to).map(|()| 0).map_err(|e| e.to_string())
                        },
                    )
                },
            )?;
        }
        Ok(())
    })
}
