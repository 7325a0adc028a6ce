//! The CPU worker pool (§5): workers never call the interpreter directly,
//! they post a completion closure the frame pump runs on the main thread at
//! step 1. Built over `tokio::task::spawn_blocking` plus a bounded
//! `tokio::sync::mpsc` channel, mirroring the teacher's
//! `MpscOutputCallback` (`crates/executor/src/vm_manager.rs`) rather than a
//! hand-rolled OS thread pool, since `tokio` is already the async substrate
//! the rest of the orchestrator runs on.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type Completion = Box<dyn FnOnce() + Send>;

pub struct ThreadPool {
    tx: mpsc::Sender<Completion>,
    rx: Mutex<mpsc::Receiver<Completion>>,
    outstanding: AtomicUsize,
}

impl ThreadPool {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Runs `work` on a blocking worker thread; `on_done` runs on the main
    /// thread, inside `drain`, once the result is back.
    pub fn spawn<T, W, D>(&self, work: W, on_done: D)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = work();
            let completion: Completion = Box::new(move || on_done(result));
            let _ = tx.blocking_send(completion);
        });
    }

    /// Frame step 1: runs every completion posted so far, without blocking
    /// for more. Returns the number drained.
    pub fn drain(&self) -> usize {
        let mut rx = self.rx.lock();
        let mut drained = 0;
        while let Ok(completion) = rx.try_recv() {
            completion();
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            drained += 1;
        }
        drained
    }

    /// `thread_pool_drain` (§5): blocks the calling async task until every
    /// spawned worker has posted its completion and been drained. Called at
    /// shutdown, background transitions, and video-mode restart.
    pub async fn drain_until_idle(&self) {
        while self.outstanding.load(Ordering::Acquire) > 0 {
            if let Some(completion) = self.rx.lock().recv().await {
                completion();
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
            } else {
                break;
            }
        }
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[tokio::test(flavor = "multi_thread")]
    async fn spawned_work_runs_its_completion_on_drain() {
        let pool = ThreadPool::new(8);
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        pool.spawn(|| 40 + 2, move |v: i32| {
            assert_eq!(v, 42);
            done2.store(true, Ordering::SeqCst);
        });
        pool.drain_until_idle().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn drain_with_nothing_posted_is_a_no_op() {
        let pool = ThreadPool::new(4);
        assert_eq!(pool.drain(), 0);
    }
}
