//                base                 newest
//                v                    v
// ---------------#####_###__##########---------> packet numbers
//
// #: in transit, awaiting ack
// _: acknowledged, removed
//
// Entries are kept in admission order, which is also packet number order.

use std::collections::VecDeque;

use crate::frame::StreamFrame;

#[derive(Debug)]
pub struct WindowEntry {
    pub packet_number: u32,
    pub frame: StreamFrame,
    // Time of the first transmission, if any
    pub first_sent_ms: Option<u64>,
    // Time of the most recent transmission
    pub last_sent_ms: u64,
    // Number of transmissions so far
    pub send_count: u32,
}

impl WindowEntry {
    /// Whether this entry should be put on the wire at `now_ms`.
    pub fn is_due(&self, now_ms: u64, rto_ms: u64) -> bool {
        self.send_count == 0 || now_ms.saturating_sub(self.last_sent_ms) >= rto_ms
    }

    pub fn mark_sent(&mut self, now_ms: u64) {
        if self.first_sent_ms.is_none() {
            self.first_sent_ms = Some(now_ms);
        }
        self.last_sent_ms = now_ms;
        self.send_count += 1;
    }
}

#[derive(Debug, Default)]
pub struct SendWindow {
    entries: VecDeque<WindowEntry>,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, packet_number: u32, frame: StreamFrame) {
        debug_assert!(self
            .entries
            .back()
            .map_or(true, |entry| entry.packet_number < packet_number));

        self.entries.push_back(WindowEntry {
            packet_number,
            frame,
            first_sent_ms: None,
            last_sent_ms: 0,
            send_count: 0,
        });
    }

    /// Removes the entry for `packet_number`, if present.
    pub fn remove(&mut self, packet_number: u32) -> Option<WindowEntry> {
        let idx = self
            .entries
            .binary_search_by_key(&packet_number, |entry| entry.packet_number)
            .ok()?;

        self.entries.remove(idx)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WindowEntry> {
        self.entries.iter_mut()
    }

    /// Time of first transmission of the longest-outstanding entry.
    pub fn oldest_first_sent_ms(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter_map(|entry| entry.first_sent_ms)
            .min()
    }
}
