//! Closure handles (§3, §4.4): an opaque integer the guest issues, which the
//! host may invoke later and must release with exactly one drop call.
//!
//! Shaped like the teacher's small hand-rolled resource handles
//! (`isola::internal::sandbox::host_bindings::ValueIterator`/
//! `FutureHostcall`) rather than a borrowed external arena crate: the slot
//! count here is bounded by concurrently open HTTP/WS handles per guest, so
//! a ~100-line `Vec<Slot>` plus free list is easier to audit for the
//! drop-exactly-once invariant than a generic dependency would be.

use parking_lot::Mutex;

/// Opaque handle the guest holds. Stale after the entry it named is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureHandle {
    index: u32,
    generation: u32,
}

/// Which side owns the callable behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Registered by a native extension with direct function pointers.
    NativeFfi,
    /// Dispatched back into the guest via a fixed exported demux function.
    Wasm,
}

enum Slot<T> {
    Vacant { next_free: Option<u32>, generation: u32 },
    Occupied { generation: u32, kind: CallbackKind, entry: T },
}

/// Generational arena of closures. `take` removes and returns an entry
/// exactly once; a second `take` (or any operation) on a stale handle
/// returns `None` rather than panicking, so a caller that raced a drop
/// against an invocation fails safe.
pub struct ClosureArena<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
}

impl<T> Default for ClosureArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClosureArena<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free_head: None,
            }),
        }
    }

    pub fn insert(&self, kind: CallbackKind, entry: T) -> ClosureHandle {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.free_head {
            let Slot::Vacant { next_free, generation } = inner.slots[index as usize] else {
                unreachable!("free list points at an occupied slot");
            };
            inner.free_head = next_free;
            inner.slots[index as usize] = Slot::Occupied { generation, kind, entry };
            return ClosureHandle { index, generation };
        }
        let index = u32::try_from(inner.slots.len()).expect("closure arena index overflow");
        inner.slots.push(Slot::Occupied { generation: 0, kind, entry });
        ClosureHandle { index, generation: 0 }
    }

    /// Looks up the callback kind for a still-live handle without consuming
    /// it, so dispatch can pick the native-FFI or WASM-demux path.
    #[must_use]
    pub fn kind(&self, handle: ClosureHandle) -> Option<CallbackKind> {
        let inner = self.inner.lock();
        match inner.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, kind, .. } if *generation == handle.generation => Some(*kind),
            _ => None,
        }
    }

    /// Removes and returns the entry behind `handle`, bumping the slot's
    /// generation so any other copy of this handle becomes stale. Returns
    /// `None` if the handle was already taken (or never existed) — this is
    /// what makes "drop on every code path" safe to call unconditionally.
    pub fn take(&self, handle: ClosureHandle) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.slots.get(handle.index as usize) {
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation => {}
            _ => return None,
        }
        let next_free = inner.free_head;
        let old = std::mem::replace(
            &mut inner.slots[handle.index as usize],
            Slot::Vacant {
                next_free,
                generation: handle.generation.wrapping_add(1),
            },
        );
        inner.free_head = Some(handle.index);
        match old {
            Slot::Occupied { entry, .. } => Some(entry),
            Slot::Vacant { .. } => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Occupied { .. }))
            .count()
    }
}

/// Resolves a success/error closure pair (§4.4): takes and returns the
/// chosen handle's entry, and takes and drops the other one in the same
/// call so exactly one side is ever invoked and the loser never leaks.
pub fn resolve_pair<T>(arena: &ClosureArena<T>, pair: (ClosureHandle, ClosureHandle), invoke_first: bool) -> Option<T> {
    let (first, second) = pair;
    let (chosen, other) = if invoke_first { (first, second) } else { (second, first) };
    arena.take(other);
    arena.take(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_take_round_trip() {
        let arena: ClosureArena<&'static str> = ClosureArena::new();
        let h = arena.insert(CallbackKind::Wasm, "payload");
        assert_eq!(arena.kind(h), Some(CallbackKind::Wasm));
        assert_eq!(arena.take(h), Some("payload"));
    }

    #[test]
    fn double_take_returns_none_once() {
        let arena: ClosureArena<i32> = ClosureArena::new();
        let h = arena.insert(CallbackKind::NativeFfi, 7);
        assert_eq!(arena.take(h), Some(7));
        assert_eq!(arena.take(h), None);
    }

    #[test]
    fn reused_slot_gets_a_stale_handle() {
        let arena: ClosureArena<i32> = ClosureArena::new();
        let h1 = arena.insert(CallbackKind::Wasm, 1);
        arena.take(h1).unwrap();
        let h2 = arena.insert(CallbackKind::Wasm, 2);
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1.generation, h2.generation);
        assert_eq!(arena.take(h1), None);
        assert_eq!(arena.take(h2), Some(2));
    }

    #[test]
    fn len_tracks_live_entries() {
        let arena: ClosureArena<()> = ClosureArena::new();
        let h1 = arena.insert(CallbackKind::Wasm, ());
        let _h2 = arena.insert(CallbackKind::Wasm, ());
        assert_eq!(arena.len(), 2);
        arena.take(h1);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn resolve_pair_invokes_one_and_drops_the_other() {
        let arena: ClosureArena<&'static str> = ClosureArena::new();
        let success = arena.insert(CallbackKind::Wasm, "success");
        let error = arena.insert(CallbackKind::Wasm, "error");
        let chosen = resolve_pair(&arena, (success, error), true);
        assert_eq!(chosen, Some("success"));
        assert_eq!(arena.take(success), None);
        assert_eq!(arena.take(error), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn resolve_pair_can_invoke_the_second_handle() {
        let arena: ClosureArena<&'static str> = ClosureArena::new();
        let success = arena.insert(CallbackKind::Wasm, "success");
        let error = arena.insert(CallbackKind::Wasm, "error");
        let chosen = resolve_pair(&arena, (success, error), false);
        assert_eq!(chosen, Some("error"));
        assert!(arena.is_empty());
    }
}
