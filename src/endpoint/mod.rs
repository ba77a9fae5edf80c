use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time;

use super::frame;

pub mod cc;
pub mod packet_log;
pub mod reassembly;
pub mod receiver;
pub mod send_buffer;
pub mod sender;
pub mod window;

pub trait HostContext {
    // Called to send a frame to the remote host.
    fn send_frame(&mut self, frame_bytes: &[u8]);
}

/// Messages from the receiver worker to the sender worker. The sender worker is the only
/// owner of window and congestion state; this is how inbound acks reach it.
#[derive(Debug)]
pub enum WorkerEvent {
    // The peer acknowledged one of our packets
    AckReceived(frame::AckFrame),
    // We received a stream packet which must be acknowledged
    AckPending(u32),
    // The peer resent a handshake packet after the handshake completed on our side
    InitialReceived,
}

/// Counters published by the sender worker.
#[derive(Default)]
struct StatCells {
    cwnd: AtomicU32,
    slow_start: AtomicBool,
    window_len: AtomicUsize,
    packets_sent: AtomicU64,
    packets_resent: AtomicU64,
    acks_sent: AtomicU64,
}

/// A snapshot of connection statistics.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    /// Current congestion window, in packets.
    pub cwnd: u32,
    /// Whether the congestion window is still in slow start.
    pub in_slow_start: bool,
    /// Number of packets sent but not yet acknowledged.
    pub window_len: usize,
    /// Number of stream packets transmitted, including retransmissions.
    pub packets_sent: u64,
    /// Number of stream packets retransmitted.
    pub packets_resent: u64,
    /// Number of ack packets transmitted.
    pub acks_sent: u64,
}

struct RecvState {
    streams: reassembly::ReassemblyBuffer,
}

/// State touched by more than one thread.
pub struct Shared {
    // Timestamps are computed relative to this instant
    time_ref: time::Instant,
    // Set once by close() or by a worker which gives up on the peer
    closing: AtomicBool,
    // Set if the connection terminated because the peer stopped responding
    unreachable: AtomicBool,
    // Written by Connection::send, drained by the sender worker
    send_buffer: Mutex<send_buffer::SendBuffer>,
    // Written by the receiver worker, drained by Connection::recv
    recv_state: Mutex<RecvState>,
    recv_cond: Condvar,
    stats: StatCells,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Buffers remain consistent even if a holder panicked
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub fn new(max_stream_payload: usize) -> Self {
        Self {
            time_ref: time::Instant::now(),
            closing: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            send_buffer: Mutex::new(send_buffer::SendBuffer::new(max_stream_payload)),
            recv_state: Mutex::new(RecvState {
                streams: reassembly::ReassemblyBuffer::new(),
            }),
            recv_cond: Condvar::new(),
            stats: StatCells::default(),
        }
    }

    /// Returns the number of whole milliseconds elapsed since the connection was created.
    pub fn time_now_ms(&self) -> u64 {
        (time::Instant::now() - self.time_ref).as_millis() as u64
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::Acquire)
    }

    /// Signals both workers to stop and wakes any blocked receivers.
    pub fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);

        let _guard = lock(&self.recv_state);
        self.recv_cond.notify_all();
    }

    /// Terminates the connection because the peer can no longer be reached.
    pub fn terminate(&self) {
        self.unreachable.store(true, Ordering::Release);
        self.begin_close();
    }

    pub fn lock_send_buffer(&self) -> MutexGuard<'_, send_buffer::SendBuffer> {
        lock(&self.send_buffer)
    }

    /// Stores a stream frame from a newly received packet. Returns false if it conflicts with a
    /// frame already held.
    pub fn deliver(&self, frame: frame::StreamFrame) -> bool {
        let mut state = lock(&self.recv_state);
        let stored = state.streams.insert(frame);
        if stored {
            self.recv_cond.notify_all();
        }
        stored
    }

    fn wait_for<T>(
        &self,
        timeout: Option<time::Duration>,
        pop: impl Fn(&mut reassembly::ReassemblyBuffer) -> Option<T>,
    ) -> Option<T> {
        let deadline = timeout.map(|t| time::Instant::now() + t);

        let mut state = lock(&self.recv_state);

        loop {
            if let Some(item) = pop(&mut state.streams) {
                return Some(item);
            }

            if self.is_closing() {
                return None;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = time::Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    deadline - now
                }
                None => time::Duration::from_millis(100),
            };

            state = self
                .recv_cond
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Pops a completed message, waiting up to `timeout` for one to become available. Returns
    /// `None` on timeout or if the connection closes first.
    pub fn wait_complete(&self, timeout: Option<time::Duration>) -> Option<(u32, Vec<u8>)> {
        self.wait_for(timeout, reassembly::ReassemblyBuffer::pop_complete)
    }

    /// Pops a completed message without waiting.
    pub fn try_complete(&self) -> Option<(u32, Vec<u8>)> {
        lock(&self.recv_state).streams.pop_complete()
    }

    /// Like [`Shared::wait_complete`], but returns whatever in-order bytes are available on a
    /// stream, along with whether they end a message.
    pub fn wait_part(&self, timeout: Option<time::Duration>) -> Option<(u32, Vec<u8>, bool)> {
        self.wait_for(timeout, reassembly::ReassemblyBuffer::pop_partial)
    }

    pub fn try_part(&self) -> Option<(u32, Vec<u8>, bool)> {
        lock(&self.recv_state).streams.pop_partial()
    }

    pub fn publish(&self, sender: &sender::Sender) {
        let cells = &self.stats;
        cells.cwnd.store(sender.cwnd(), Ordering::Relaxed);
        cells
            .slow_start
            .store(sender.in_slow_start(), Ordering::Relaxed);
        cells
            .window_len
            .store(sender.window_len(), Ordering::Release);
    }

    pub fn count_sent(&self, resent: bool) {
        self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
        if resent {
            self.stats.packets_resent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count_ack_sent(&self) {
        self.stats.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of frames queued or awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        let queued = self.lock_send_buffer().len();
        queued + self.stats.window_len.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Stats {
        let cells = &self.stats;
        Stats {
            cwnd: cells.cwnd.load(Ordering::Relaxed),
            in_slow_start: cells.slow_start.load(Ordering::Relaxed),
            window_len: cells.window_len.load(Ordering::Acquire),
            packets_sent: cells.packets_sent.load(Ordering::Relaxed),
            packets_resent: cells.packets_resent.load(Ordering::Relaxed),
            acks_sent: cells.acks_sent.load(Ordering::Relaxed),
        }
    }
}
