//! The guest's event-ring façade (§4.5, §4.6 step 6): the orchestrator
//! pushes input and time events onto a FIFO ring each tick; the guest
//! drains it via `read_events(buffer, capacity, sizeof_event)`. The host
//! VERIFIES the guest's record size against its own before copying
//! anything — a guest built against a different event-record layout fails
//! loudly instead of silently misreading the buffer.
//!
//! Like `http.rs`, this façade never touches guest memory directly: it
//! hands back already-encoded fixed-size records and leaves the copy into
//! the guest's buffer to the FFI bridge.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{Error, Result};

/// Byte size of one encoded event record (tag + two 8-byte payload words).
/// Every event, input or time, is padded to this width so the ring is a
/// flat array of fixed-stride records rather than a length-prefixed stream.
pub const EVENT_RECORD_SIZE: usize = 24;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventTag {
    Time = 0,
    Input = 1,
}

pub type EventRecord = [u8; EVENT_RECORD_SIZE];

/// The per-session event queue. Input events arrive from whatever OS event
/// source is wired up outside this crate (out of scope here); the
/// orchestrator appends the closing time event itself each tick so the
/// invariant "the last event of every batch is the time event" (§4.6) holds
/// regardless of what fed the input events.
pub struct EventRing {
    queue: Mutex<VecDeque<EventRecord>>,
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRing {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a pre-encoded input record (opaque to this façade: pointer
    /// position, key code, etc. are the platform layer's concern).
    pub fn push_input(&self, payload: [u8; 16]) {
        self.queue.lock().push_back(encode(EventTag::Input, payload));
    }

    /// Appends the tick's closing time event (§4.6 step 6: "the last event
    /// must be a time event").
    pub fn push_time(&self, now_ms: u64, delta_ms: u64) {
        let mut payload = [0u8; 16];
        payload[0..8].copy_from_slice(&now_ms.to_le_bytes());
        payload[8..16].copy_from_slice(&delta_ms.to_le_bytes());
        self.queue.lock().push_back(encode(EventTag::Time, payload));
    }

    /// Drains up to `capacity` records in FIFO order, after verifying the
    /// guest's declared record size matches ours exactly.
    pub fn read_events(&self, capacity: usize, guest_sizeof_event: usize) -> Result<Vec<EventRecord>> {
        if guest_sizeof_event != EVENT_RECORD_SIZE {
            return Err(Error::EventRecordSize {
                expected: EVENT_RECORD_SIZE,
                actual: guest_sizeof_event,
            });
        }
        let mut queue = self.queue.lock();
        let n = capacity.min(queue.len());
        Ok(queue.drain(..n).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode(tag: EventTag, payload: [u8; 16]) -> EventRecord {
    let mut record = [0u8; EVENT_RECORD_SIZE];
    record[0..4].copy_from_slice(&(tag as u32).to_le_bytes());
    record[8..24].copy_from_slice(&payload);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_event_is_drained_last() {
        let ring = EventRing::new();
        ring.push_input([1u8; 16]);
        ring.push_time(1_000, 16);
        let events = ring.read_events(10, EVENT_RECORD_SIZE).unwrap();
        assert_eq!(events.len(), 2);
        let last_tag = u32::from_le_bytes(events[1][0..4].try_into().unwrap());
        assert_eq!(last_tag, EventTag::Time as u32);
    }

    #[test]
    fn mismatched_record_size_is_rejected() {
        let ring = EventRing::new();
        ring.push_time(0, 0);
        let err = ring.read_events(10, 16).unwrap_err();
        assert!(matches!(err, Error::EventRecordSize { expected: EVENT_RECORD_SIZE, actual: 16 }));
    }

    #[test]
    fn read_respects_capacity_and_leaves_the_rest_queued() {
        let ring = EventRing::new();
        for _ in 0..5 {
            ring.push_input([0u8; 16]);
        }
        let first = ring.read_events(3, EVENT_RECORD_SIZE).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(ring.len(), 2);
    }
}
