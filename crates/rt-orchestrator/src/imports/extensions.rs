//! Binds every `LoadedExtension::linker_bindings()` entry into the active
//! interpreter's linker, completing the `register_linker` half of the
//! extension contract (`extension::RawExtensionVtable`) the loader already
//! collects but never wires anywhere.
//!
//! An extension describes its own import with `(name, signature, func_ptr)`;
//! `signature` uses the same bitstring alphabet `rt_interp::vtable` already
//! defines for the bridge (`encode_signature`/`decode_signature`). Only a
//! handful of shapes are supported, matching what real extensions actually
//! export today (a handful of scalar or pointer arguments, an optional `i32`
//! result); anything wider is skipped with a warning rather than guessed at
//! via a fragile arity table.

use rt_host::extension::LinkerBinding;
use rt_interp::vtable::{decode_signature, ArgKind};

#[must_use]
pub fn linker_callback(bindings: Vec<LinkerBinding>) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        for binding in &bindings {
            let Some((ret, args)) = decode_signature(&binding.signature) else {
                tracing::warn!(name = %binding.name, signature = %binding.signature, "extension signature did not parse; skipping");
                continue;
            };
            let name = binding.name.clone();
            let ptr = binding.func_ptr;
            match (ret, args.as_slice()) {
                (ArgKind::Void, []) => {
                    let f: unsafe extern "C" fn() = unsafe { std::mem::transmute(ptr) };
                    linker.func_wrap("env", &name, move |_caller: wasmtime::Caller<'_, _>| unsafe { f() })?;
                }
                (ArgKind::Void, [ArgKind::I32 | ArgKind::Pointer]) => {
                    let f: unsafe extern "C" fn(u32) = unsafe { std::mem::transmute(ptr) };
                    linker.func_wrap("env", &name, move |_caller: wasmtime::Caller<'_, _>, a0: u32| unsafe { f(a0) })?;
                }
                (ArgKind::Void, [ArgKind::I32 | ArgKind::Pointer, ArgKind::I32 | ArgKind::Pointer]) => {
                    let f: unsafe extern "C" fn(u32, u32) = unsafe { std::mem::transmute(ptr) };
                    linker.func_wrap("env", &name, move |_caller: wasmtime::Caller<'_, _>, a0: u32, a1: u32| unsafe { f(a0, a1) })?;
                }
                (ArgKind::I32, []) => {
                    let f: unsafe extern "C" fn() -> i32 = unsafe { std::mem::transmute(ptr) };
                    linker.func_wrap("env", &name, move |_caller: wasmtime::Caller<'_, _>| -> i32 { unsafe { f() } })?;
                }
                (ArgKind::I32, [ArgKind::I32 | ArgKind::Pointer]) => {
                    let f: unsafe extern "C" fn(u32) -> i32 = unsafe { std::mem::transmute(ptr) };
                    linker.func_wrap("env", &name, move |_caller: wasmtime::Caller<'_, _>, a0: u32| -> i32 { unsafe { f(a0) } })?;
                }
                _ => {
                    tracing::warn!(name = %binding.name, signature = %binding.signature, "extension signature shape not supported; skipping");
                }
            }
        }
        Ok(())
    })
}
