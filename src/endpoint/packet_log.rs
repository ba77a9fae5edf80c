use std::collections::BTreeMap;

/// Packet numbers accepted from the peer, stored as disjoint inclusive ranges.
///
/// Packet numbers are assigned in order, so accepted numbers quickly coalesce into a handful
/// of ranges.
#[derive(Debug, Default)]
pub struct PacketLog {
    // Range start -> range end (inclusive)
    ranges: BTreeMap<u32, u32>,
}

impl PacketLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, packet_number: u32) -> bool {
        self.ranges
            .range(..=packet_number)
            .next_back()
            .is_some_and(|(_, &end)| packet_number <= end)
    }

    /// Records `packet_number`. Returns false if it was already recorded.
    pub fn insert(&mut self, packet_number: u32) -> bool {
        if self.contains(packet_number) {
            return false;
        }

        let mut start = packet_number;
        let mut end = packet_number;

        if let Some((&below_start, &below_end)) = self.ranges.range(..packet_number).next_back() {
            if below_end.checked_add(1) == Some(packet_number) {
                start = below_start;
            }
        }

        if let Some(next) = packet_number.checked_add(1) {
            if let Some(above_end) = self.ranges.remove(&next) {
                end = above_end;
            }
        }

        self.ranges.insert(start, end);
        true
    }

    #[cfg(test)]
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_numbers_coalesce() {
        let mut log = PacketLog::new();

        for pn in 10..100 {
            assert!(log.insert(pn));
        }

        assert_eq!(log.range_count(), 1);
        assert!(log.contains(10));
        assert!(log.contains(99));
        assert!(!log.contains(9));
        assert!(!log.contains(100));
    }

    #[test]
    fn gaps_fill_in() {
        let mut log = PacketLog::new();

        log.insert(1);
        log.insert(3);
        log.insert(5);
        assert_eq!(log.range_count(), 3);
        assert!(!log.contains(2));

        log.insert(4);
        assert_eq!(log.range_count(), 2);

        log.insert(2);
        assert_eq!(log.range_count(), 1);

        for pn in 1..=5 {
            assert!(log.contains(pn));
        }
    }

    #[test]
    fn repeats_are_reported() {
        let mut log = PacketLog::new();

        assert!(log.insert(7));
        assert!(!log.insert(7));

        assert!(log.insert(u32::MAX));
        assert!(log.insert(0));
        assert!(!log.insert(u32::MAX));
        assert_eq!(log.range_count(), 3);
    }
}
