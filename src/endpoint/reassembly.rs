use std::collections::{BTreeMap, HashMap};

use crate::frame::StreamFrame;

/// Received stream frames awaiting delivery, by stream.
///
/// Each stream is a run of bytes split into messages by finished frames. A message is complete
/// once the frames held for its stream cover every byte from the stream's delivery point through
/// a finished frame. A frame from below the delivery point means the peer numbered the stream
/// again from zero, and delivery restarts there.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    streams: BTreeMap<u32, Vec<StreamFrame>>,
    // Offset up to which each stream has been delivered
    delivered: HashMap<u32, u64>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams holding undelivered frames.
    #[cfg(test)]
    pub fn pending_streams(&self) -> usize {
        self.streams.len()
    }

    /// Buffers `frame`, which must come from a packet not seen before. Returns false if a frame
    /// at the same offset is already held, in which case nothing changes.
    pub fn insert(&mut self, frame: StreamFrame) -> bool {
        let held = self
            .streams
            .get(&frame.stream_id)
            .is_some_and(|frames| frames.iter().any(|held| held.offset == frame.offset));

        if held {
            return false;
        }

        let base = self.delivered.entry(frame.stream_id).or_insert(0);

        if frame.offset < *base {
            tracing::trace!(
                stream_id = frame.stream_id,
                offset = frame.offset,
                delivered = *base,
                "stream restarted from zero"
            );
            *base = 0;
        }

        self.streams.entry(frame.stream_id).or_default().push(frame);
        true
    }

    /// Removes and returns the first complete message, scanning streams in id order.
    pub fn pop_complete(&mut self) -> Option<(u32, Vec<u8>)> {
        let (stream_id, data, _) = self.pop_where(|run| run.finished)?;
        Some((stream_id, data))
    }

    /// Removes and returns the bytes available in order on the first stream which has any,
    /// scanning streams in id order. The bytes stop at the end of a message; the flag says
    /// whether they reach it.
    pub fn pop_partial(&mut self) -> Option<(u32, Vec<u8>, bool)> {
        self.pop_where(|run| run.finished || run.end > run.base)
    }

    fn pop_where(&mut self, ready: impl Fn(&Run) -> bool) -> Option<(u32, Vec<u8>, bool)> {
        let mut found = None;

        for (&stream_id, frames) in self.streams.iter_mut() {
            let base = self.delivered.get(&stream_id).copied().unwrap_or(0);

            frames.sort_by_key(|frame| frame.offset);

            let run = contiguous_prefix(frames, base);
            if ready(&run) {
                found = Some((stream_id, run));
                break;
            }
        }

        let (stream_id, run) = found?;

        let frames = self.streams.get_mut(&stream_id)?;
        let rest = frames.split_off(run.count);
        let taken = std::mem::replace(frames, rest);

        if frames.is_empty() {
            self.streams.remove(&stream_id);
        }

        self.delivered.insert(stream_id, run.end);

        let mut data = Vec::with_capacity((run.end - run.base) as usize);
        let mut cursor = run.base;

        for frame in taken {
            // Skip any bytes already copied from an overlapping frame
            let skip = cursor.saturating_sub(frame.offset) as usize;
            if skip < frame.payload.len() {
                data.extend_from_slice(&frame.payload[skip..]);
                cursor = frame.end();
            }
        }

        Some((stream_id, data, run.finished))
    }
}

/// A gapless run of held frames starting at a stream's delivery point.
struct Run {
    count: usize,
    base: u64,
    end: u64,
    finished: bool,
}

/// Given frames sorted by offset, finds the run starting at `base`. The run stops at a gap or
/// after the first frame which ends a message.
fn contiguous_prefix(frames: &[StreamFrame], base: u64) -> Run {
    let mut run = Run {
        count: 0,
        base,
        end: base,
        finished: false,
    };

    for frame in frames {
        if frame.offset > run.end {
            // Gap
            break;
        }

        run.end = run.end.max(frame.end());
        run.count += 1;

        if frame.finished && frame.end() >= run.end {
            run.finished = true;
            break;
        }
    }

    run
}
