//! `app_request_background`/`app_request_foreground` (§4.6 step 9):
//! guest-settable flags the frame pump polls once per frame, shaped
//! identically to [`crate::restart::RestartFlag`] — two independent
//! cooperative flags rather than one, since a guest may request either
//! transition and the frame pump needs to tell them apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct BackgroundFlag {
    background_requested: AtomicBool,
    foreground_requested: AtomicBool,
}

impl BackgroundFlag {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_background(&self) {
        self.background_requested.store(true, Ordering::Release);
    }

    pub fn request_foreground(&self) {
        self.foreground_requested.store(true, Ordering::Release);
    }

    pub fn take_background(&self) -> bool {
        self.background_requested.swap(false, Ordering::AcqRel)
    }

    pub fn take_foreground(&self) -> bool {
        self.foreground_requested.swap(false, Ordering::AcqRel)
    }
}

/// Binds `app_request_background`/`app_request_foreground` into the guest's
/// import table, the same way `restart::linker_callback` binds
/// `app_request_restart`.
#[must_use]
pub fn linker_callback(flag: Arc<BackgroundFlag>) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        let bg = flag.clone();
        linker.func_wrap("env", "app_request_background", move |_caller: wasmtime::Caller<'_, _>| {
            bg.request_background();
        })?;
        let fg = flag.clone();
        linker.func_wrap("env", "app_request_foreground", move |_caller: wasmtime::Caller<'_, _>| {
            fg.request_foreground();
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_background_clears_only_the_background_flag() {
        let flag = BackgroundFlag::new();
        flag.request_background();
        assert!(flag.take_background());
        assert!(!flag.take_background());
        assert!(!flag.take_foreground());
    }

    #[test]
    fn take_foreground_clears_only_the_foreground_flag() {
        let flag = BackgroundFlag::new();
        flag.request_foreground();
        assert!(flag.take_foreground());
        assert!(!flag.take_foreground());
        assert!(!flag.take_background());
    }
}
