//! The interpreter contract (§4.3): every backend is installed behind this
//! trait; exactly one is active at a time.

use crate::Result;

/// One argument or return slot's type, per the FFI bridge's signature
/// alphabet. 4 bits would suffice per slot (`void, i32, i64, pointer, f32,
/// f64` fits in 3 bits with room to spare); we keep the bitstring only as a
/// wire format for interpreters that demand one (`encode_signature`) and
/// derive it from the concrete host function type everywhere else, per the
/// redesign note against string-mangled C signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Void,
    I32,
    I64,
    Pointer,
    F32,
    F64,
}

/// A single argument or return value, already tagged with its kind so the
/// bridge knows whether to run it through pointer translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Word {
    I32(i32),
    I64(i64),
    /// A guest-space offset. Never dereferenced directly; the bridge
    /// translates it via [`WasmInterpreter::translate_ptr_guest_to_host`]
    /// before it reaches a native thunk.
    Pointer(u32),
    F32(f32),
    F64(f64),
}

impl Word {
    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::I32(_) => ArgKind::I32,
            Self::I64(_) => ArgKind::I64,
            Self::Pointer(_) => ArgKind::Pointer,
            Self::F32(_) => ArgKind::F32,
            Self::F64(_) => ArgKind::F64,
        }
    }
}

/// Round-trips a signature to the compact bitstring some interpreters
/// require at registration time. Alphabet: `void, i32, i64, pointer, f32,
/// f64`; one hex nibble per slot, first nibble is the return kind.
#[must_use]
pub fn encode_signature(ret: ArgKind, args: &[ArgKind]) -> String {
    let mut out = String::with_capacity(1 + args.len());
    out.push(nibble_of(ret));
    for a in args {
        out.push(nibble_of(*a));
    }
    out
}

/// Inverse of [`encode_signature`]: first char is the return kind, the rest
/// are argument kinds in declaration order.
#[must_use]
pub fn decode_signature(s: &str) -> Option<(ArgKind, Vec<ArgKind>)> {
    let mut chars = s.chars();
    let ret = kind_of(chars.next()?)?;
    let args = chars.map(kind_of).collect::<Option<Vec<_>>>()?;
    Some((ret, args))
}

const fn nibble_of(kind: ArgKind) -> char {
    match kind {
        ArgKind::Void => '0',
        ArgKind::I32 => 'i',
        ArgKind::I64 => 'I',
        ArgKind::Pointer => 'p',
        ArgKind::F32 => 'f',
        ArgKind::F64 => 'd',
    }
}

const fn kind_of(c: char) -> Option<ArgKind> {
    match c {
        '0' => Some(ArgKind::Void),
        'i' => Some(ArgKind::I32),
        'I' => Some(ArgKind::I64),
        'p' => Some(ArgKind::Pointer),
        'f' => Some(ArgKind::F32),
        'd' => Some(ArgKind::F64),
        _ => None,
    }
}

/// An opaque handle to a loaded module's bytecode + working-set region.
/// Backends mint these from `load` and never hand out the underlying
/// store/instance directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WasmMemory(pub(crate) u64);

impl WasmMemory {
    /// Mints a handle from a raw backend id. Test doubles that implement
    /// [`WasmInterpreter`] themselves use this with an arbitrary id; a
    /// host-import thunk bound into a real backend's `Linker` uses it with
    /// the id the active store reports for itself (e.g.
    /// `HostState::memory_id`), since a `func_wrap` closure is registered
    /// before `load` mints the `WasmMemory` it will eventually return.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

/// Status of one host→guest call, matching the interpreter's native result
/// taxonomy exactly (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    FunctionNotFound,
    UnreachableExecuted,
    OutOfBoundsMemoryAccess,
    UnknownFailure,
}

/// The full result of one `call_SIG`: status, a short interpreter-specific
/// detail string (stack trace where available), and the function name for
/// error reporting. Callers MUST inspect every result.
#[derive(Debug, Clone)]
pub struct WasmCallResult {
    pub status: CallStatus,
    pub details: String,
    pub function_name: String,
}

impl WasmCallResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, CallStatus::Success)
    }
}

pub type LinkerCallback = Box<dyn Fn(&mut wasmtime::Linker<crate::wasmtime_backend::HostState>) -> anyhow::Result<()> + Send + Sync>;

/// The interpreter vtable (§4.3). Implementations install imports via
/// `register_linker` before the first `load`; registration is idempotent
/// across reloads.
pub trait WasmInterpreter: Send + Sync {
    /// Allocates the region, reads bytecode, validates, links host imports,
    /// and returns a handle sized per the resolved runtime-configuration's
    /// `wasm_memory_size` (`low_size`/`high_size` in bytes).
    fn load(&self, bytes: &[u8], low_size: u64, high_size: u64) -> Result<WasmMemory>;

    /// Releases the region. Must tolerate partial initialization (a `load`
    /// that failed partway through).
    fn unload(&self, memory: WasmMemory) -> Result<()>;

    /// Maps a guest-space offset into the current linear memory. Offset 0
    /// always maps to null, even if translation would otherwise succeed.
    fn translate_ptr_guest_to_host(&self, memory: WasmMemory, offset: u32) -> Result<*mut u8>;

    /// Inverse of `translate_ptr_guest_to_host`; only defined for pointers
    /// within the current linear memory.
    fn translate_ptr_host_to_guest(&self, memory: WasmMemory, ptr: *const u8) -> Result<u32>;

    /// Newline-separated guest function names, innermost first.
    fn get_callstack(&self, memory: WasmMemory) -> String;

    /// Registers a host-import callback to run once per `load`.
    fn register_linker(&self, callback: LinkerCallback);

    /// The one true entry point: every `call_SIG` convenience method is a
    /// thin wrapper around this generic call, matching the redesign note
    /// that keeps the signature bitstring a wire format rather than the
    /// source of truth.
    fn call(&self, memory: WasmMemory, name: &str, args: &[Word], ret: ArgKind) -> (WasmCallResult, Option<Word>);

    fn call_void(&self, memory: WasmMemory, name: &str) -> WasmCallResult {
        self.call(memory, name, &[], ArgKind::Void).0
    }

    fn call_i(&self, memory: WasmMemory, name: &str, a0: i32) -> WasmCallResult {
        self.call(memory, name, &[Word::I32(a0)], ArgKind::Void).0
    }

    fn call_ii(&self, memory: WasmMemory, name: &str, a0: i32, a1: i32) -> WasmCallResult {
        self.call(memory, name, &[Word::I32(a0), Word::I32(a1)], ArgKind::Void).0
    }

    fn call_iii(&self, memory: WasmMemory, name: &str, a0: i32, a1: i32, a2: i32) -> WasmCallResult {
        self.call(memory, name, &[Word::I32(a0), Word::I32(a1), Word::I32(a2)], ArgKind::Void).0
    }

    /// `ip`: one i32, one guest pointer.
    fn call_ip(&self, memory: WasmMemory, name: &str, a0: i32, ptr: u32) -> WasmCallResult {
        self.call(memory, name, &[Word::I32(a0), Word::Pointer(ptr)], ArgKind::Void).0
    }

    /// `iI`: one i32, one i64.
    fn call_ii_wide(&self, memory: WasmMemory, name: &str, a0: i32, a1: i64) -> WasmCallResult {
        self.call(memory, name, &[Word::I32(a0), Word::I64(a1)], ArgKind::Void).0
    }

    /// `ri_i`: one i32 argument, returns an i32.
    fn call_ri_i(&self, memory: WasmMemory, name: &str, a0: i32) -> (WasmCallResult, i32) {
        let (result, ret) = self.call(memory, name, &[Word::I32(a0)], ArgKind::I32);
        let value = match ret {
            Some(Word::I32(v)) => v,
            _ => 0,
        };
        (result, value)
    }

    /// Packs a variable argument vector, for host functions whose arity is
    /// only known at the call site (the spec's `argv` form).
    fn call_argv(&self, memory: WasmMemory, name: &str, args: &[Word]) -> WasmCallResult {
        self.call(memory, name, args, ArgKind::Void).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let args = [ArgKind::I32, ArgKind::Pointer, ArgKind::I64];
        let encoded = encode_signature(ArgKind::I32, &args);
        let (ret, decoded) = decode_signature(&encoded).unwrap();
        assert_eq!(ret, ArgKind::I32);
        assert_eq!(decoded, args);
    }

    #[test]
    fn unknown_signature_char_fails_decode() {
        assert!(decode_signature("iz").is_none());
    }
}
