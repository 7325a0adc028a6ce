//! Thin wrapper over a loaded guest module's lifecycle exports. Every
//! method here is a `call_*` convenience on [`rt_interp::WasmInterpreter`];
//! this module's only job is naming the exports the frame pump and the
//! background/foreground/video-restart transitions need and turning a
//! failed [`rt_interp::WasmCallResult`] into a [`crate::Error`].

use rt_interp::{WasmInterpreter, WasmMemory, Word};

use crate::{Error, Result};

/// A loaded guest module, addressed by its interpreter handle. Does not own
/// the interpreter or the memory handle; both outlive every `App` built
/// over them (the interpreter owns the instance map, `App` is a view).
pub struct App<'a> {
    interp: &'a dyn WasmInterpreter,
    memory: WasmMemory,
}

impl<'a> App<'a> {
    #[must_use]
    pub const fn new(interp: &'a dyn WasmInterpreter, memory: WasmMemory) -> Self {
        Self { interp, memory }
    }

    /// Runs once after `load`, before the first frame.
    pub fn initialize(&self) -> Result<()> {
        let result = self.interp.call_void(self.memory, "initialize");
        if result.is_success() {
            Ok(())
        } else {
            Err(Error::AppInitFailed(result.details))
        }
    }

    /// Frame step 8: `now_ms` is wall-clock milliseconds since boot,
    /// `dt_ms` the clamped frame delta, `ctx_ptr` the guest-space pointer to
    /// the app-context structure the guest expects as its third argument.
    pub fn tick(&self, now_ms: i64, dt_ms: u32, ctx_ptr: u32) -> Result<()> {
        let dt_secs = f64::from(dt_ms) / 1000.0;
        let (result, _) = self.interp.call(
            self.memory,
            "app_tick",
            &[Word::I64(now_ms), Word::F64(dt_secs), Word::Pointer(ctx_ptr)],
            rt_interp::ArgKind::Void,
        );
        if result.is_success() {
            Ok(())
        } else {
            Err(Error::AppInitFailed(result.details))
        }
    }

    /// Brackets a full render-device teardown/rebuild during a video-mode
    /// restart (§4.6).
    pub fn video_restart_begin(&self) -> Result<()> {
        let result = self.interp.call_void(self.memory, "app_video_restart_begin");
        result.is_success().then_some(()).ok_or(Error::AppInitFailed(result.details))
    }

    pub fn video_restart_end(&self) -> Result<()> {
        let result = self.interp.call_void(self.memory, "app_video_restart_end");
        result.is_success().then_some(()).ok_or(Error::AppInitFailed(result.details))
    }

    /// Runs on clean shutdown only; a trapped guest skips this.
    pub fn shutdown(&self) -> Result<()> {
        let result = self.interp.call_void(self.memory, "shutdown");
        if result.is_success() {
            Ok(())
        } else {
            Err(Error::AppShutdownFailed(result.details))
        }
    }
}

#[cfg(test)]
mod tests {
    use rt_interp::{ArgKind, CallStatus, LinkerCallback, WasmCallResult};

    use super::*;

    /// Reports every call as whatever `status` says, regardless of name or
    /// arguments; good enough to drive `App`'s success/failure branches
    /// without a real guest module.
    struct FakeInterpreter {
        status: CallStatus,
    }

    impl WasmInterpreter for FakeInterpreter {
        fn load(&self, _bytes: &[u8], _low_size: u64, _high_size: u64) -> rt_interp::Result<WasmMemory> {
            unimplemented!()
        }

        fn unload(&self, _memory: WasmMemory) -> rt_interp::Result<()> {
            unimplemented!()
        }

        fn translate_ptr_guest_to_host(&self, _memory: WasmMemory, _offset: u32) -> rt_interp::Result<*mut u8> {
            unimplemented!()
        }

        fn translate_ptr_host_to_guest(&self, _memory: WasmMemory, _ptr: *const u8) -> rt_interp::Result<u32> {
            unimplemented!()
        }

        fn get_callstack(&self, _memory: WasmMemory) -> String {
            String::new()
        }

        fn register_linker(&self, _callback: LinkerCallback) {}

        fn call(&self, _memory: WasmMemory, name: &str, _args: &[Word], _ret: ArgKind) -> (WasmCallResult, Option<Word>) {
            (
                WasmCallResult {
                    status: self.status,
                    details: "fake failure".to_string(),
                    function_name: name.to_string(),
                },
                None,
            )
        }
    }

    fn memory() -> WasmMemory {
        WasmMemory::from_raw(0)
    }

    #[test]
    fn initialize_succeeds_when_the_call_succeeds() {
        let interp = FakeInterpreter { status: CallStatus::Success };
        let app = App::new(&interp, memory());
        assert!(app.initialize().is_ok());
    }

    #[test]
    fn initialize_fails_when_the_call_traps() {
        let interp = FakeInterpreter {
            status: CallStatus::UnreachableExecuted,
        };
        let app = App::new(&interp, memory());
        assert!(matches!(app.initialize(), Err(Error::AppInitFailed(_))));
    }

    #[test]
    fn shutdown_fails_when_the_call_traps() {
        let interp = FakeInterpreter {
            status: CallStatus::UnreachableExecuted,
        };
        let app = App::new(&interp, memory());
        assert!(matches!(app.shutdown(), Err(Error::AppShutdownFailed(_))));
    }

    #[test]
    fn tick_succeeds_when_the_call_succeeds() {
        let interp = FakeInterpreter { status: CallStatus::Success };
        let app = App::new(&interp, memory());
        assert!(app.tick(1_000, 16, 0).is_ok());
    }
}
