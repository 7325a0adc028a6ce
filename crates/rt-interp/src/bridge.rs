//! Argument-layout thunks for host functions imported by the guest (§4.4).
//!
//! A host import receives raw words from the interpreter's argument stack;
//! any word tagged `Pointer` must be translated to a host pointer before the
//! native implementation sees it, and a null translation of a non-null
//! offset aborts the call rather than handing the native side a dangling
//! pointer.

use crate::vtable::{CallStatus, WasmCallResult, WasmInterpreter, WasmMemory, Word};

/// Translates every pointer-tagged word in `args` via `interp`, then invokes
/// `native` with the fully resolved argument list. This is the one place in
/// the bridge where a guest offset becomes a host pointer; nothing else in
/// the call path is allowed to dereference a raw `u32` offset.
pub fn dispatch<F>(
    interp: &dyn WasmInterpreter,
    memory: WasmMemory,
    function_name: &str,
    args: &[Word],
    native: F,
) -> WasmCallResult
where
    F: FnOnce(&[ResolvedArg]) -> Result<(), String>,
{
    let mut resolved = Vec::with_capacity(args.len());
    for word in args {
        match word {
            Word::Pointer(offset) => match interp.translate_ptr_guest_to_host(memory, *offset) {
                Ok(ptr) if ptr.is_null() && *offset != 0 => {
                    return WasmCallResult {
                        status: CallStatus::OutOfBoundsMemoryAccess,
                        details: format!("pointer argument at offset {offset} translated to null"),
                        function_name: function_name.to_string(),
                    };
                }
                Ok(ptr) => resolved.push(ResolvedArg::Pointer(ptr)),
                Err(e) => {
                    return WasmCallResult {
                        status: CallStatus::OutOfBoundsMemoryAccess,
                        details: e.to_string(),
                        function_name: function_name.to_string(),
                    };
                }
            },
            Word::I32(v) => resolved.push(ResolvedArg::I32(*v)),
            Word::I64(v) => resolved.push(ResolvedArg::I64(*v)),
            Word::F32(v) => resolved.push(ResolvedArg::F32(*v)),
            Word::F64(v) => resolved.push(ResolvedArg::F64(*v)),
        }
    }

    match native(&resolved) {
        Ok(()) => WasmCallResult {
            status: CallStatus::Success,
            details: String::new(),
            function_name: function_name.to_string(),
        },
        Err(details) => WasmCallResult {
            status: CallStatus::UnknownFailure,
            details,
            function_name: function_name.to_string(),
        },
    }
}

/// An argument after pointer translation: pointers are now raw host
/// pointers valid for the duration of the call only.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedArg {
    I32(i32),
    I64(i64),
    Pointer(*mut u8),
    F32(f32),
    F64(f64),
}

/// As [`dispatch`], for the common case of a host import that returns a
/// single scalar rather than just success/failure: `native` hands back the
/// value on success, `default` is used if argument translation fails or
/// `native` itself errors (logged at `warn`, never propagated to the guest
/// as a trap).
pub fn dispatch_with_default<T: Copy>(
    interp: &dyn WasmInterpreter,
    memory: WasmMemory,
    function_name: &str,
    args: &[Word],
    default: T,
    native: impl FnOnce(&[ResolvedArg]) -> Result<T, String>,
) -> T {
    let mut value = default;
    let result = dispatch(interp, memory, function_name, args, |resolved| match native(resolved) {
        Ok(v) => {
            value = v;
            Ok(())
        }
        Err(e) => Err(e),
    });
    if !result.is_success() {
        tracing::warn!(function = function_name, details = %result.details, "host import failed");
    }
    value
}

/// Copies `len` bytes out of guest memory at an already-translated `ptr`
/// into an owned buffer. A null pointer (offset 0) or zero length reads as
/// empty rather than erroring, matching the bridge's null-is-absent
/// convention.
///
/// # Safety
/// `ptr` must come from [`WasmInterpreter::translate_ptr_guest_to_host`] and
/// `len` must not exceed the guest's own declared buffer size; this
/// function trusts the caller for the latter the same way `dispatch` trusts
/// it for every other pointer argument.
#[must_use]
pub unsafe fn read_guest_bytes(ptr: *const u8, len: u32) -> Vec<u8> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(ptr, len as usize).to_vec()
}

/// As [`read_guest_bytes`], decoded as UTF-8 with lossy replacement rather
/// than rejecting malformed guest strings outright.
///
/// # Safety
/// Same contract as [`read_guest_bytes`].
#[must_use]
pub unsafe fn read_guest_str(ptr: *const u8, len: u32) -> String {
    String::from_utf8_lossy(&read_guest_bytes(ptr, len)).into_owned()
}

/// Copies `data` into the guest buffer at `ptr`, truncating to `cap` bytes.
/// Returns the number of bytes actually written.
///
/// # Safety
/// `ptr` must come from [`WasmInterpreter::translate_ptr_guest_to_host`] and
/// `cap` must not exceed the guest's own declared buffer size.
pub unsafe fn write_guest_bytes(ptr: *mut u8, cap: u32, data: &[u8]) -> u32 {
    if ptr.is_null() || cap == 0 {
        return 0;
    }
    let n = data.len().min(cap as usize);
    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, n);
    n as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtable::ArgKind;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeInterp {
        base: *mut u8,
        len: usize,
    }
    unsafe impl Send for FakeInterp {}
    unsafe impl Sync for FakeInterp {}

    impl WasmInterpreter for FakeInterp {
        fn load(&self, _bytes: &[u8], _low: u64, _high: u64) -> crate::Result<WasmMemory> {
            Ok(WasmMemory(0))
        }
        fn unload(&self, _memory: WasmMemory) -> crate::Result<()> {
            Ok(())
        }
        fn translate_ptr_guest_to_host(&self, _memory: WasmMemory, offset: u32) -> crate::Result<*mut u8> {
            if offset == 0 {
                return Ok(std::ptr::null_mut());
            }
            if (offset as usize) >= self.len {
                return Ok(std::ptr::null_mut());
            }
            Ok(unsafe { self.base.add(offset as usize) })
        }
        fn translate_ptr_host_to_guest(&self, _memory: WasmMemory, _ptr: *const u8) -> crate::Result<u32> {
            Ok(0)
        }
        fn get_callstack(&self, _memory: WasmMemory) -> String {
            String::new()
        }
        fn register_linker(&self, _callback: crate::vtable::LinkerCallback) {}
        fn call(&self, _memory: WasmMemory, name: &str, _args: &[Word], _ret: ArgKind) -> (WasmCallResult, Option<Word>) {
            (
                WasmCallResult {
                    status: CallStatus::Success,
                    details: String::new(),
                    function_name: name.to_string(),
                },
                None,
            )
        }
    }

    #[test]
    fn valid_pointer_reaches_native_thunk() {
        let mut backing = [0u8; 16];
        let interp = FakeInterp {
            base: backing.as_mut_ptr(),
            len: backing.len(),
        };
        let seen = AtomicU64::new(0);
        let result = dispatch(&interp, WasmMemory(0), "host_fn", &[Word::Pointer(4)], |resolved| {
            if let ResolvedArg::Pointer(p) = resolved[0] {
                seen.store(p as u64, Ordering::Relaxed);
            }
            Ok(())
        });
        assert!(result.is_success());
        assert_eq!(seen.load(Ordering::Relaxed), unsafe { interp.base.add(4) } as u64);
    }

    #[test]
    fn out_of_bounds_offset_aborts_before_native_runs() {
        let mut backing = [0u8; 4];
        let interp = FakeInterp {
            base: backing.as_mut_ptr(),
            len: backing.len(),
        };
        let native_ran = AtomicU64::new(0);
        let result = dispatch(&interp, WasmMemory(0), "host_fn", &[Word::Pointer(100)], |_| {
            native_ran.store(1, Ordering::Relaxed);
            Ok(())
        });
        assert_eq!(result.status, CallStatus::OutOfBoundsMemoryAccess);
        assert_eq!(native_ran.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn dispatch_with_default_returns_the_native_value_on_success() {
        let mut backing = [0u8; 16];
        let interp = FakeInterp { base: backing.as_mut_ptr(), len: backing.len() };
        let value = dispatch_with_default(&interp, WasmMemory(0), "host_fn", &[Word::I32(7)], -1i32, |resolved| match resolved[0] {
            ResolvedArg::I32(v) => Ok(v * 2),
            _ => Err("unexpected arg".to_string()),
        });
        assert_eq!(value, 14);
    }

    #[test]
    fn dispatch_with_default_falls_back_on_out_of_bounds() {
        let mut backing = [0u8; 4];
        let interp = FakeInterp { base: backing.as_mut_ptr(), len: backing.len() };
        let value = dispatch_with_default(&interp, WasmMemory(0), "host_fn", &[Word::Pointer(100)], -1i32, |_| Ok(0));
        assert_eq!(value, -1);
    }

    #[test]
    fn write_then_read_guest_bytes_round_trips() {
        let mut backing = [0u8; 8];
        unsafe {
            let n = write_guest_bytes(backing.as_mut_ptr(), backing.len() as u32, b"hi");
            assert_eq!(n, 2);
            assert_eq!(read_guest_bytes(backing.as_ptr(), 2), b"hi");
        }
    }

    #[test]
    fn write_guest_bytes_truncates_to_capacity() {
        let mut backing = [0u8; 2];
        unsafe {
            let n = write_guest_bytes(backing.as_mut_ptr(), backing.len() as u32, b"hello");
            assert_eq!(n, 2);
        }
    }

    #[test]
    fn read_guest_bytes_of_null_is_empty() {
        unsafe {
            assert!(read_guest_bytes(std::ptr::null(), 10).is_empty());
        }
    }

    #[test]
    fn zero_offset_is_null_without_error() {
        let mut backing = [0u8; 4];
        let interp = FakeInterp {
            base: backing.as_mut_ptr(),
            len: backing.len(),
        };
        let result = dispatch(&interp, WasmMemory(0), "host_fn", &[Word::Pointer(0)], |resolved| {
            assert!(matches!(resolved[0], ResolvedArg::Pointer(p) if p.is_null()));
            Ok(())
        });
        assert!(result.is_success());
    }
}
