//! The extension loader (§4.7): probes a directory of dynamic libraries for
//! a `get_interface` symbol exposing a fixed C vtable, merges each
//! extension's requested memory reservations into the runtime
//! configuration by taking the element-wise maximum (the one place
//! extensions are allowed to raise, never lower, a reservation), and drives
//! `startup`/`tick`/`suspend`/`resume`/`shutdown` through the orchestrator.
//!
//! Grounded on the teacher workspace's lowest-level DSO loader
//! (`bytecodealliance-lucet`'s `lucet-runtime-internals/src/module/dl.rs`):
//! `libloading::Library::new` plus `lib.get::<Symbol<...>>(b"symbol")`,
//! validated eagerly at load time rather than lazily at first use.

use std::ffi::{c_char, c_void, CStr, OsStr};
use std::fs;
use std::path::Path;

use libloading::{Library, Symbol};
use rt_config::runtime_config::MemoryReservations;

use crate::{Error, Result};

const RESERVATION_FIELD_COUNT: usize = 16;

/// Out-param struct `get_runtime_config` fills in; field order matches the
/// declaration order of `LowMemoryReservations`/`HighMemoryReservations`
/// (`runtime, rhi, render_device, bundle, canvas,
/// canvas_font_scratchpad, cncbus, curl, curl_fragment_buffers,
/// json_deflate, default_thread_pool, ssl, http2, httpx,
/// httpx_fragment_buffers, reporting`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMemoryReservations {
    pub low: [u64; RESERVATION_FIELD_COUNT],
    pub high: [u64; RESERVATION_FIELD_COUNT],
}

impl From<RawMemoryReservations> for MemoryReservations {
    fn from(raw: RawMemoryReservations) -> Self {
        macro_rules! fields_from {
            ($arr:expr) => {
                [
                    $arr[0], $arr[1], $arr[2], $arr[3], $arr[4], $arr[5], $arr[6], $arr[7], $arr[8], $arr[9], $arr[10], $arr[11],
                    $arr[12], $arr[13], $arr[14], $arr[15],
                ]
            };
        }
        let [runtime, rhi, render_device, bundle, canvas, canvas_font_scratchpad, cncbus, curl, curl_fragment_buffers, json_deflate, default_thread_pool, ssl, http2, httpx, httpx_fragment_buffers, reporting] =
            fields_from!(raw.low);
        let low = rt_config::runtime_config::LowMemoryReservations {
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
        };
        let [runtime, rhi, render_device, bundle, canvas, canvas_font_scratchpad, cncbus, curl, curl_fragment_buffers, json_deflate, default_thread_pool, ssl, http2, httpx, httpx_fragment_buffers, reporting] =
            fields_from!(raw.high);
        let high = rt_config::runtime_config::HighMemoryReservations {
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
        };
        MemoryReservations { low, high }
    }
}

/// One `(name, signature, function_pointer)` triple an extension registers
/// during linker setup. Binding these into the active interpreter's import
/// table is the orchestrator's job, once it owns both the extension list
/// and the interpreter; this loader only collects what extensions ask for.
#[derive(Debug, Clone)]
pub struct LinkerBinding {
    pub name: String,
    pub signature: String,
    pub func_ptr: *const c_void,
}

// The raw pointer is a foreign function pointer into the loaded library,
// which outlives every `LinkerBinding` derived from it (the library is
// never unloaded before `shutdown`).
unsafe impl Send for LinkerBinding {}
unsafe impl Sync for LinkerBinding {}

type RegisterLinkerFn = unsafe extern "C" fn(register_ctx: *mut c_void, name: *const c_char, signature: *const c_char, func_ptr: *const c_void);

#[repr(C)]
struct RawExtensionVtable {
    query_info: unsafe extern "C" fn(ctx: *mut c_void) -> *const c_char,
    get_runtime_config: unsafe extern "C" fn(ctx: *mut c_void, out: *mut RawMemoryReservations),
    startup: unsafe extern "C" fn(ctx: *mut c_void) -> i32,
    tick: unsafe extern "C" fn(ctx: *mut c_void, dt_ms: u32),
    suspend: unsafe extern "C" fn(ctx: *mut c_void),
    resume: unsafe extern "C" fn(ctx: *mut c_void),
    shutdown: unsafe extern "C" fn(ctx: *mut c_void),
    register_linker: Option<unsafe extern "C" fn(ctx: *mut c_void, register: RegisterLinkerFn, register_ctx: *mut c_void)>,
}

type GetInterfaceFn = unsafe extern "C" fn(out_ctx: *mut *mut c_void) -> *const RawExtensionVtable;

/// A single loaded extension. Keeps the `Library` alive for as long as the
/// vtable and context pointer it handed out remain in use.
pub struct LoadedExtension {
    _lib: Library,
    vtable: &'static RawExtensionVtable,
    ctx: *mut c_void,
    name: String,
}

// `vtable` points into the pinned, `mmap`-backed DSO image and `ctx` is the
// extension's own opaque state; the extension contract requires both to be
// safe to call from the single thread the orchestrator drives them from.
unsafe impl Send for LoadedExtension {}

impl LoadedExtension {
    /// Loads one extension DSO and probes it for `get_interface`.
    ///
    /// # Safety
    /// The DSO must actually export a `get_interface` symbol matching
    /// `GetInterfaceFn` and must return a vtable whose function pointers
    /// remain valid for the lifetime of the returned `LoadedExtension`.
    pub unsafe fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let lib = Library::new(path).map_err(|e| Error::ExtensionLoad(name.clone(), e))?;
        let get_interface: Symbol<GetInterfaceFn> = lib
            .get(b"get_interface")
            .map_err(|_| Error::ExtensionMissingInterface(name.clone()))?;

        let mut ctx: *mut c_void = std::ptr::null_mut();
        let vtable_ptr = get_interface(&mut ctx);
        if vtable_ptr.is_null() {
            return Err(Error::ExtensionMissingInterface(name));
        }
        let vtable: &'static RawExtensionVtable = &*vtable_ptr;

        Ok(Self { _lib: lib, vtable, ctx, name })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable identity the vtable reports for itself; falls back to
    /// the file stem if the extension returns a null or non-UTF-8 string.
    #[must_use]
    pub fn query_info(&self) -> String {
        unsafe {
            let raw = (self.vtable.query_info)(self.ctx);
            if raw.is_null() {
                return self.name.clone();
            }
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        }
    }

    #[must_use]
    pub fn get_runtime_config(&self) -> MemoryReservations {
        let mut raw = RawMemoryReservations {
            low: [0; RESERVATION_FIELD_COUNT],
            high: [0; RESERVATION_FIELD_COUNT],
        };
        unsafe {
            (self.vtable.get_runtime_config)(self.ctx, &mut raw);
        }
        raw.into()
    }

    pub fn startup(&self) -> std::result::Result<(), i32> {
        let code = unsafe { (self.vtable.startup)(self.ctx) };
        if code == 0 {
            Ok(())
        } else {
            Err(code)
        }
    }

    /// Runs every frame inside the orchestrator (§4.6 step 4).
    pub fn tick(&self, dt_ms: u32) {
        unsafe { (self.vtable.tick)(self.ctx, dt_ms) }
    }

    pub fn suspend(&self) {
        unsafe { (self.vtable.suspend)(self.ctx) }
    }

    pub fn resume(&self) {
        unsafe { (self.vtable.resume)(self.ctx) }
    }

    pub fn shutdown(&self) {
        unsafe { (self.vtable.shutdown)(self.ctx) }
    }

    /// Collects the extension's requested host-function bindings, if it
    /// exposes any (`register_linker` is the one optional vtable slot).
    #[must_use]
    pub fn linker_bindings(&self) -> Vec<LinkerBinding> {
        let Some(register_linker) = self.vtable.register_linker else {
            return Vec::new();
        };
        let mut bindings = Vec::new();
        unsafe {
            register_linker(self.ctx, collect_binding, std::ptr::addr_of_mut!(bindings).cast());
        }
        bindings
    }
}

unsafe extern "C" fn collect_binding(register_ctx: *mut c_void, name: *const c_char, signature: *const c_char, func_ptr: *const c_void) {
    if name.is_null() || signature.is_null() {
        return;
    }
    let bindings = &mut *register_ctx.cast::<Vec<LinkerBinding>>();
    bindings.push(LinkerBinding {
        name: CStr::from_ptr(name).to_string_lossy().into_owned(),
        signature: CStr::from_ptr(signature).to_string_lossy().into_owned(),
        func_ptr,
    });
}

/// Probes `dir` for loadable extensions. A file that fails to load (missing
/// symbol, load error) is skipped with a warning rather than aborting the
/// whole scan, since the directory may hold unrelated files.
pub fn discover(dir: &Path) -> Result<Vec<LoadedExtension>> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !is_loadable_library(&path) {
            continue;
        }
        match unsafe { LoadedExtension::load(&path) } {
            Ok(ext) => found.push(ext),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping extension that failed to load"),
        }
    }
    Ok(found)
}

fn is_loadable_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("so") | Some("dylib") | Some("dll")
    )
}

/// Merges every loaded extension's requested reservations into `base` by
/// element-wise maximum (§4.7's one precedence exception).
#[must_use]
pub fn merge_reservations(base: MemoryReservations, extensions: &[LoadedExtension]) -> MemoryReservations {
    extensions.iter().fold(base, |acc, ext| {
        let requested = ext.get_runtime_config();
        MemoryReservations {
            low: acc.low.max(requested.low),
            high: acc.high.max(requested.high),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_reservations_convert_field_for_field() {
        let mut low = [0u64; RESERVATION_FIELD_COUNT];
        low[0] = 1024; // runtime
        low[5] = 2048; // canvas_font_scratchpad
        let raw = RawMemoryReservations { low, high: [0; RESERVATION_FIELD_COUNT] };
        let converted: MemoryReservations = raw.into();
        assert_eq!(converted.low.runtime, 1024);
        assert_eq!(converted.low.canvas_font_scratchpad, 2048);
    }

    #[test]
    fn merge_reservations_is_elementwise_max_with_no_extensions() {
        let base = MemoryReservations::default();
        let merged = merge_reservations(base, &[]);
        assert_eq!(merged.low.runtime, base.low.runtime);
    }

    #[test]
    fn discover_on_missing_directory_returns_empty() {
        let found = discover(Path::new("/nonexistent/extensions/dir")).unwrap();
        assert!(found.is_empty());
    }
}
