//! Process-wide trap diagnostic slot (§4.4).
//!
//! The redesign note against a process-wide mutable error slot favors an
//! explicit return value or task-local state; every current call path
//! already gets that via [`crate::WasmCallResult`]. This module exists only
//! as the legacy accessor the spec names directly
//! (`get_wasm_error_and_stack_trace` / `clear_wasm_error_and_stack_trace`),
//! kept as an adapter for callers that haven't been threaded through to the
//! call-result value yet.

use std::sync::OnceLock;

use parking_lot::Mutex;

fn slot() -> &'static Mutex<Option<String>> {
    static SLOT: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Stores `"<trap-message>\n<callstack>"` on any interpreter trap. Cleared
/// by a successful call or by `clear_wasm_error_and_stack_trace`.
pub fn record_trap(trap_message: &str, callstack: &str) {
    *slot().lock() = Some(format!("{trap_message}\n{callstack}"));
}

pub fn clear_on_success() {
    *slot().lock() = None;
}

#[must_use]
pub fn get_wasm_error_and_stack_trace() -> Option<String> {
    slot().lock().clone()
}

pub fn clear_wasm_error_and_stack_trace() {
    clear_on_success();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_clear_round_trips() {
        // Tests run concurrently and share the process-wide slot; serialize
        // this one test's view of it.
        static GUARD: Mutex<()> = Mutex::new(());
        let _g = GUARD.lock();
        clear_wasm_error_and_stack_trace();
        record_trap("unreachable executed", "inner\nouter");
        assert_eq!(
            get_wasm_error_and_stack_trace().as_deref(),
            Some("unreachable executed\ninner\nouter")
        );
        clear_wasm_error_and_stack_trace();
        assert_eq!(get_wasm_error_and_stack_trace(), None);
    }
}
