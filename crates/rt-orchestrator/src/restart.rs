//! `app_request_restart` (§4.6): a guest-settable flag the frame pump
//! checks at the end of every frame. Cooperative only — there is no
//! preemptive cancellation of a guest tick already in progress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared between the host-import thunk bound into the guest's linker and
/// the frame pump that polls it once per frame (§4.6 step 9).
#[derive(Default)]
pub struct RestartFlag {
    requested: AtomicBool,
}

impl RestartFlag {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Reads and clears the flag in one step so a restart is acted on
    /// exactly once.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

/// Binds `app_request_restart` into the guest's import table. Kept
/// separate from `rt_interp::extension`'s `register_linker` collection
/// mechanism: this is a host-native import the orchestrator always
/// provides, not one sourced from an optional extension DSO.
#[must_use]
pub fn linker_callback(flag: Arc<RestartFlag>) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        let flag = flag.clone();
        linker.func_wrap("env", "app_request_restart", move |_caller: wasmtime::Caller<'_, _>| {
            flag.request();
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_flag() {
        let flag = RestartFlag::new();
        assert!(!flag.take());
        flag.request();
        assert!(flag.take());
        assert!(!flag.take());
    }
}
