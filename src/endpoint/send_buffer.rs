use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::frame::StreamFrame;

/// Splits `data` into stream frames of at most `max_payload` bytes, starting at `offset`. If
/// `end` is set the last frame is marked finished, and empty data becomes a single empty
/// finished frame. Empty data without `end` produces no frames.
pub fn fragment(
    stream_id: u32,
    offset: u64,
    data: &[u8],
    end: bool,
    max_payload: usize,
) -> Vec<StreamFrame> {
    assert!(max_payload > 0);

    if data.is_empty() {
        if !end {
            return Vec::new();
        }

        return vec![StreamFrame {
            stream_id,
            offset,
            finished: true,
            payload: Box::new([]),
        }];
    }

    let chunk_count = data.len().div_ceil(max_payload);

    data.chunks(max_payload)
        .enumerate()
        .map(|(i, chunk)| StreamFrame {
            stream_id,
            offset: offset + (i * max_payload) as u64,
            finished: end && i + 1 == chunk_count,
            payload: chunk.into(),
        })
        .collect()
}

/// Frames waiting for admission into the send window, queued per stream.
#[derive(Debug)]
pub struct SendBuffer {
    max_payload: usize,
    // Pending frames by stream, in offset order
    streams: BTreeMap<u32, VecDeque<StreamFrame>>,
    // Offset of the next byte queued on each stream
    next_offsets: HashMap<u32, u64>,
    // Stream served most recently
    cursor: Option<u32>,
    // Total number of queued frames
    len: usize,
}

impl SendBuffer {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            streams: BTreeMap::new(),
            next_offsets: HashMap::new(),
            cursor: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queues `data` on `stream_id`, closing the current message if `end` is set. Returns the
    /// number of frames it was split into.
    pub fn push(&mut self, stream_id: u32, data: &[u8], end: bool) -> usize {
        let offset = self.next_offsets.entry(stream_id).or_insert(0);

        let frames = fragment(stream_id, *offset, data, end, self.max_payload);
        *offset += data.len() as u64;

        let count = frames.len();

        self.streams.entry(stream_id).or_default().extend(frames);
        self.len += count;

        count
    }

    /// Takes the next frame, visiting streams round-robin in id order.
    pub fn pop_next(&mut self) -> Option<StreamFrame> {
        let stream_id = match self.cursor {
            Some(cursor) => self
                .streams
                .range(cursor.saturating_add(1)..)
                .next()
                .filter(|_| cursor < u32::MAX)
                .or_else(|| self.streams.iter().next())
                .map(|(&id, _)| id)?,
            None => *self.streams.keys().next()?,
        };

        let queue = self.streams.get_mut(&stream_id)?;
        let frame = queue.pop_front();

        if queue.is_empty() {
            self.streams.remove(&stream_id);
        }

        if frame.is_some() {
            self.len -= 1;
            self.cursor = Some(stream_id);
        }

        frame
    }
}
