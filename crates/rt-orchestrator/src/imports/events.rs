//! `sb_read_events` (§4.4): the demux ring's single guest-callable import,
//! named after the `sb_`-prefixed convention `DEMUX_EXPORT` (`sb_invoke_closure`)
//! already uses for guest-facing symbols. Copies each ready `EventRecord` into
//! the guest buffer back to back and returns the count copied, so the guest
//! can advance its own read cursor by `count * guest_sizeof_event`.

use std::sync::Arc;

use rt_host::events::EventRing;
use rt_interp::bridge::{self, ResolvedArg};
use rt_interp::{WasmInterpreter, WasmMemory, Word};

#[must_use]
pub fn linker_callback(interp: Arc<dyn WasmInterpreter>, ring: Arc<EventRing>) -> rt_interp::LinkerCallback {
    Box::new(move |linker| {
        let interp = interp.clone();
        let ring = ring.clone();
        linker.func_wrap(
            "env",
            "sb_read_events",
            move |caller: wasmtime::Caller<'_, _>, buf_ptr: u32, capacity: u32, sizeof_event: u32| -> i32 {
                let memory = WasmMemory::from_raw(caller.data().memory_id());
                bridge::dispatch_with_default(
                    interp.as_ref(),
                    memory,
                    "sb_read_events",
                    &[Word::Pointer(buf_ptr)],
                    -1i32,
                    |resolved| {
                        let ResolvedArg::Pointer(ptr) = resolved[0] else {
                            return Err("expected pointer".to_string());
                        };
                        let records = ring.read_events(capacity as usize, sizeof_event as usize).map_err(|e| e.to_string())?;
                        for (i, record) in records.iter().enumerate() {
                            let slot = unsafe { ptr.add(i * sizeof_event as usize) };
                            unsafe { bridge::write_guest_bytes(slot, sizeof_event, record) };
                        }
                        Ok(records.len() as i32)
                    },
                )
            },
        )?;
        Ok(())
    })
}
