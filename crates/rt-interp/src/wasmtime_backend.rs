//! The one interpreter backend this repo ships, built on `wasmtime`'s core
//! (non-component) API — `Engine`/`Module`/`Instance`/`Linker`/`Memory`/
//! `Store` — because `wasmtime` is the crate the teacher workspace already
//! depends on and links against. The teacher's own `isola` crate talks to
//! wasmtime through the WIT/component-model API; that abstraction hides the
//! guest-offset linear-memory access the FFI bridge needs, so this backend
//! goes one level lower while keeping the teacher's patterns (error enums,
//! `ResourceLimiter`, epoch ticker, builder-then-instantiate ordering).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wasmtime::{Config, Engine, Instance, Linker, Memory, Module, ResourceLimiter, Store, Val};

use crate::diagnostics;
use crate::epoch::{self, EpochRegistration, EpochTicker, WatchdogTicks};
use crate::vtable::{ArgKind, CallStatus, LinkerCallback, WasmCallResult, WasmInterpreter, WasmMemory, Word};
use crate::{Error, Result};

/// Grounded directly on `isola::internal::resource::MemoryLimiter`: bounds
/// guest linear-memory and table growth to the sizes the resolved
/// runtime-configuration allows.
pub struct MemoryLimiter {
    max_memory_hard: usize,
    max_table_elements_hard: usize,
}

impl MemoryLimiter {
    #[must_use]
    pub fn new(max_memory_hard: usize) -> Self {
        const TABLE_ELEMENT_BUDGET_BYTES: usize = 64;
        const MIN_TABLE_ELEMENTS: usize = 1024;
        let max_table_elements_hard = (max_memory_hard / TABLE_ELEMENT_BUDGET_BYTES).max(MIN_TABLE_ELEMENTS);
        Self {
            max_memory_hard,
            max_table_elements_hard,
        }
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_memory_hard)
    }

    fn table_growing(&mut self, _current: usize, desired: usize, _maximum: Option<usize>) -> wasmtime::Result<bool> {
        Ok(desired <= self.max_table_elements_hard)
    }
}

pub struct HostState {
    limiter: MemoryLimiter,
    memory_id: u64,
}

impl HostState {
    /// The backend id this instance's store will be filed under once `load`
    /// finishes inserting it. A host-import closure bound via
    /// `register_linker` runs before that insertion, so it reads this field
    /// (set right after the id is minted) rather than the `WasmMemory`
    /// handle `load` eventually returns to the caller.
    #[must_use]
    pub const fn memory_id(&self) -> u64 {
        self.memory_id
    }
}

struct LoadedInstance {
    store: Mutex<Store<HostState>>,
    instance: Instance,
    memory: Memory,
    #[allow(dead_code)]
    epoch_guard: EpochRegistration,
}

pub struct WasmtimeInterpreter {
    engine: Engine,
    ticker: Arc<EpochTicker>,
    watchdog: WatchdogTicks,
    linkers: Mutex<Vec<LinkerCallback>>,
    instances: Mutex<HashMap<u64, LoadedInstance>>,
    next_id: AtomicU64,
}

impl WasmtimeInterpreter {
    pub fn new(watchdog: &rt_config::runtime_config::WatchdogConfig) -> Result<Self> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(Error::LoadFailure)?;
        let ticker = epoch::global_epoch_ticker()?.clone();
        Ok(Self {
            engine,
            ticker,
            watchdog: WatchdogTicks::from_config(watchdog),
            linkers: Mutex::new(Vec::new()),
            instances: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn with_instance<R>(&self, memory: WasmMemory, f: impl FnOnce(&LoadedInstance) -> R) -> Option<R> {
        let instances = self.instances.lock();
        instances.get(&memory.0).map(f)
    }
}

impl WasmInterpreter for WasmtimeInterpreter {
    fn load(&self, bytes: &[u8], low_size: u64, high_size: u64) -> Result<WasmMemory> {
        let module = Module::new(&self.engine, bytes).map_err(Error::LoadFailure)?;

        let mut store = Store::new(
            &self.engine,
            HostState {
                limiter: MemoryLimiter::new(high_size.max(low_size) as usize),
                memory_id: 0,
            },
        );
        store.limiter(|state| &mut state.limiter);
        store.set_epoch_deadline(self.watchdog.warning_ticks);
        store.epoch_deadline_callback(epoch::deadline_callback(self.watchdog));

        let mut linker = Linker::new(&self.engine);
        for cb in self.linkers.lock().iter() {
            cb(&mut linker).map_err(Error::LinkFailure)?;
        }

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(Error::LoadFailure)?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| Error::LoadFailure(anyhow::anyhow!("module exports no linear memory named \"memory\"")))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        store.data_mut().memory_id = id;
        let guard = self.ticker.register(self.engine.clone());
        self.instances.lock().insert(
            id,
            LoadedInstance {
                store: Mutex::new(store),
                instance,
                memory,
                epoch_guard: guard,
            },
        );
        Ok(WasmMemory(id))
    }

    fn unload(&self, memory: WasmMemory) -> Result<()> {
        // Removing the entry drops the store (and with it the epoch
        // registration); tolerate a handle that never finished loading.
        self.instances.lock().remove(&memory.0);
        Ok(())
    }

    fn translate_ptr_guest_to_host(&self, memory: WasmMemory, offset: u32) -> Result<*mut u8> {
        if offset == 0 {
            return Ok(std::ptr::null_mut());
        }
        self.with_instance(memory, |loaded| {
            let mut store = loaded.store.lock();
            let data = loaded.memory.data_mut(&mut *store);
            if (offset as usize) >= data.len() {
                return Err(Error::PointerOutOfBounds(offset));
            }
            Ok(unsafe { data.as_mut_ptr().add(offset as usize) })
        })
        .unwrap_or(Err(Error::PointerOutOfBounds(offset)))
    }

    fn translate_ptr_host_to_guest(&self, memory: WasmMemory, ptr: *const u8) -> Result<u32> {
        self.with_instance(memory, |loaded| {
            let mut store = loaded.store.lock();
            let data = loaded.memory.data(&mut *store);
            let base = data.as_ptr() as usize;
            let addr = ptr as usize;
            if addr < base || addr >= base + data.len() {
                return Err(Error::PointerOutOfBounds(0));
            }
            Ok((addr - base) as u32)
        })
        .unwrap_or(Err(Error::PointerOutOfBounds(0)))
    }

    fn get_callstack(&self, memory: WasmMemory) -> String {
        // Outside an active trap, wasmtime has no live call stack to walk;
        // the meaningful callstack is captured at trap time into the
        // diagnostic slot (see `call`'s `Err(trap)` arm).
        if self.with_instance(memory, |_| ()).is_none() {
            return String::new();
        }
        diagnostics::get_wasm_error_and_stack_trace()
            .and_then(|s| s.split_once('\n').map(|(_, stack)| stack.to_string()))
            .unwrap_or_default()
    }

    fn register_linker(&self, callback: LinkerCallback) {
        self.linkers.lock().push(callback);
    }

    fn call(&self, memory: WasmMemory, name: &str, args: &[Word], ret: ArgKind) -> (WasmCallResult, Option<Word>) {
        let Some(outcome) = self.with_instance(memory, |loaded| {
            let mut store = loaded.store.lock();
            let Some(func) = loaded.instance.get_func(&mut *store, name) else {
                return (
                    WasmCallResult {
                        status: CallStatus::FunctionNotFound,
                        details: format!("export {name:?} not found"),
                        function_name: name.to_string(),
                    },
                    None,
                );
            };

            let wasm_args: Vec<Val> = args
                .iter()
                .map(|w| match w {
                    Word::I32(v) => Val::I32(*v),
                    Word::I64(v) => Val::I64(*v),
                    Word::Pointer(v) => Val::I32(*v as i32),
                    Word::F32(v) => Val::F32(v.to_bits()),
                    Word::F64(v) => Val::F64(v.to_bits()),
                })
                .collect();
            let mut results = vec![Val::I32(0); usize::from(!matches!(ret, ArgKind::Void))];

            match func.call(&mut *store, &wasm_args, &mut results) {
                Ok(()) => {
                    diagnostics::clear_on_success();
                    let value = results.first().map(|v| match ret {
                        ArgKind::I32 | ArgKind::Pointer => Word::I32(v.unwrap_i32()),
                        ArgKind::I64 => Word::I64(v.unwrap_i64()),
                        ArgKind::F32 => Word::F32(f32::from_bits(v.unwrap_f32())),
                        ArgKind::F64 => Word::F64(f64::from_bits(v.unwrap_f64())),
                        ArgKind::Void => Word::I32(0),
                    });
                    (
                        WasmCallResult {
                            status: CallStatus::Success,
                            details: String::new(),
                            function_name: name.to_string(),
                        },
                        value,
                    )
                }
                Err(trap) => {
                    let callstack = String::new();
                    diagnostics::record_trap(&trap.to_string(), &callstack);
                    let status = if trap.to_string().contains("out of bounds") {
                        CallStatus::OutOfBoundsMemoryAccess
                    } else if trap.to_string().contains("unreachable") {
                        CallStatus::UnreachableExecuted
                    } else {
                        CallStatus::UnknownFailure
                    };
                    (
                        WasmCallResult {
                            status,
                            details: trap.to_string(),
                            function_name: name.to_string(),
                        },
                        None,
                    )
                }
            }
        }) else {
            return (
                WasmCallResult {
                    status: CallStatus::UnknownFailure,
                    details: "wasm memory handle is not loaded".to_string(),
                    function_name: name.to_string(),
                },
                None,
            );
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtable::Word;

    const ADD_MODULE: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add)
            (func (export "diverge") unreachable))
    "#;

    fn default_watchdog() -> rt_config::runtime_config::WatchdogConfig {
        rt_config::runtime_config::WatchdogConfig {
            enabled: true,
            suspend_threshold: 3,
            warning_delay_ms: 5_000,
            fatal_delay_ms: 15_000,
        }
    }

    #[test]
    fn load_and_call_round_trips_i32() {
        let interp = WasmtimeInterpreter::new(&default_watchdog()).unwrap();
        let mem = interp.load(ADD_MODULE.as_bytes(), 1 << 16, 1 << 20).unwrap();
        let (result, value) = interp.call(mem, "add", &[Word::I32(2), Word::I32(40)], ArgKind::I32);
        assert!(result.is_success());
        assert_eq!(value, Some(Word::I32(42)));
        interp.unload(mem).unwrap();
    }

    #[test]
    fn calling_missing_export_reports_function_not_found() {
        let interp = WasmtimeInterpreter::new(&default_watchdog()).unwrap();
        let mem = interp.load(ADD_MODULE.as_bytes(), 1 << 16, 1 << 20).unwrap();
        let (result, _) = interp.call(mem, "does_not_exist", &[], ArgKind::Void);
        assert_eq!(result.status, CallStatus::FunctionNotFound);
    }

    #[test]
    fn unreachable_trap_is_reported_and_recorded() {
        let interp = WasmtimeInterpreter::new(&default_watchdog()).unwrap();
        let mem = interp.load(ADD_MODULE.as_bytes(), 1 << 16, 1 << 20).unwrap();
        let (result, _) = interp.call(mem, "diverge", &[], ArgKind::Void);
        assert_eq!(result.status, CallStatus::UnreachableExecuted);
        assert!(diagnostics::get_wasm_error_and_stack_trace().is_some());
    }

    #[test]
    fn zero_offset_translates_to_null_without_touching_instance() {
        let interp = WasmtimeInterpreter::new(&default_watchdog()).unwrap();
        let mem = interp.load(ADD_MODULE.as_bytes(), 1 << 16, 1 << 20).unwrap();
        assert!(interp.translate_ptr_guest_to_host(mem, 0).unwrap().is_null());
    }
}
