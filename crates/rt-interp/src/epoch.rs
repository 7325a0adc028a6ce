//! Epoch-based guest watchdog (§6 `sys_params.watchdog`), grounded directly
//! on the teacher's `VmManager` epoch ticker
//! (`crates/executor/src/vm_manager.rs`): a dedicated OS thread increments
//! every registered engine's epoch on a fixed tick, independent of whatever
//! async runtime is driving guest calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use wasmtime::{Engine, UpdateDeadline};

const EPOCH_TICK: Duration = Duration::from_millis(10);

struct Shared {
    engines: Mutex<HashMap<u64, Engine>>,
    next_id: AtomicU64,
}

pub struct EpochTicker {
    shared: Arc<Shared>,
}

/// Keeps one engine's epoch advancing for as long as this registration is
/// held; dropping it unregisters the engine.
pub struct EpochRegistration {
    id: u64,
    shared: Arc<Shared>,
}

impl Drop for EpochRegistration {
    fn drop(&mut self) {
        self.shared.engines.lock().remove(&self.id);
    }
}

impl EpochTicker {
    /// Spawns the background ticker thread. Call once per process; share
    /// the result across every `WasmtimeInterpreter`.
    pub fn spawn() -> crate::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            engines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });
        let bg = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("rt-epoch-ticker".to_string())
            .spawn(move || loop {
                std::thread::sleep(EPOCH_TICK);
                let engines: Vec<Engine> = bg.engines.lock().values().cloned().collect();
                for engine in engines {
                    engine.increment_epoch();
                }
            })
            .map_err(crate::Error::TickerStart)?;
        Ok(Arc::new(Self { shared }))
    }

    pub fn register(self: &Arc<Self>, engine: Engine) -> EpochRegistration {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.engines.lock().insert(id, engine);
        EpochRegistration {
            id,
            shared: Arc::clone(&self.shared),
        }
    }
}

pub fn global_epoch_ticker() -> crate::Result<&'static Arc<EpochTicker>> {
    static GLOBAL: OnceLock<Arc<EpochTicker>> = OnceLock::new();
    if let Some(t) = GLOBAL.get() {
        return Ok(t);
    }
    let ticker = EpochTicker::spawn()?;
    Ok(GLOBAL.get_or_init(|| ticker))
}

/// Suspend/warn/fatal thresholds expressed in epoch ticks rather than
/// milliseconds, so the deadline callback can compare cheaply against a
/// counter instead of a wall-clock read on every check.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTicks {
    pub warning_ticks: u64,
    pub fatal_ticks: u64,
}

impl WatchdogTicks {
    #[must_use]
    pub fn from_config(cfg: &rt_config::runtime_config::WatchdogConfig) -> Self {
        let tick_ms = EPOCH_TICK.as_millis().max(1) as u64;
        Self {
            warning_ticks: (cfg.warning_delay_ms / tick_ms).max(1),
            fatal_ticks: (cfg.fatal_delay_ms / tick_ms).max(1),
        }
    }
}

/// Builds the `epoch_deadline_callback` closure wasmtime invokes when a
/// store's epoch deadline elapses mid-call. Below `fatal_ticks` it logs a
/// warning and extends the deadline by one more warning interval
/// (cooperative suspend-and-continue); at or past `fatal_ticks` it traps
/// the call.
pub fn deadline_callback(
    ticks: WatchdogTicks,
) -> impl FnMut(wasmtime::StoreContextMut<'_, crate::wasmtime_backend::HostState>) -> anyhow::Result<UpdateDeadline> + Send + Sync + 'static
{
    let mut elapsed_warnings = 0u64;
    move |_store| {
        elapsed_warnings += 1;
        let ticks_elapsed = elapsed_warnings * ticks.warning_ticks;
        if ticks_elapsed >= ticks.fatal_ticks {
            tracing::error!(ticks_elapsed, "guest call exceeded fatal watchdog delay; trapping");
            anyhow::bail!("guest call exceeded fatal watchdog delay");
        }
        tracing::warn!(ticks_elapsed, "guest call exceeded warning watchdog delay; suspending");
        Ok(UpdateDeadline::Continue(ticks.warning_ticks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_ticks_floor_at_one() {
        let cfg = rt_config::runtime_config::WatchdogConfig {
            enabled: true,
            suspend_threshold: 3,
            warning_delay_ms: 1,
            fatal_delay_ms: 1,
        };
        let ticks = WatchdogTicks::from_config(&cfg);
        assert!(ticks.warning_ticks >= 1);
        assert!(ticks.fatal_ticks >= 1);
    }
}
