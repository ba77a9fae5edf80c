use std::collections::VecDeque;
use std::sync::mpsc;
use std::time;

use super::cc::CongestionControl;
use super::send_buffer::SendBuffer;
use super::window::SendWindow;
use super::{HostContext, Shared, WorkerEvent};

use crate::frame;
use crate::frame::serial;
use crate::Config;

/// Sender worker state. Owns the send window and congestion controller; nothing else touches
/// them.
pub struct Sender {
    // Packets awaiting acknowledgement
    window: SendWindow,
    cc: CongestionControl,
    // Packet numbers we still owe an ack for
    ack_queue: VecDeque<u32>,
    next_packet_number: u32,
    // Receive window advertised in every ack
    local_window: u32,
    rto_ms: u64,
    connection_timeout_ms: u64,
    // Scratch buffer for outbound datagrams
    tx_buffer: Box<[u8]>,
    // Final handshake packet, resent whenever the peer repeats its Initial
    handshake_echo: Option<Box<[u8]>>,
    echo_pending: bool,
}

impl Sender {
    pub fn new(
        config: &Config,
        peer_window: u32,
        next_packet_number: u32,
        handshake_echo: Option<Box<[u8]>>,
    ) -> Self {
        Self {
            window: SendWindow::new(),
            cc: CongestionControl::new(peer_window, config.slow_start_threshold),
            ack_queue: VecDeque::new(),
            next_packet_number,
            local_window: config.receive_window,
            rto_ms: config.retransmit_timeout_ms,
            connection_timeout_ms: config.connection_timeout_ms,
            tx_buffer: vec![0; config.datagram_size_max].into_boxed_slice(),
            handshake_echo,
            echo_pending: false,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd()
    }

    pub fn in_slow_start(&self) -> bool {
        self.cc.in_slow_start()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn ack_queue_len(&self) -> usize {
        self.ack_queue.len()
    }

    fn take_packet_number(&mut self) -> u32 {
        let packet_number = self.next_packet_number;
        self.next_packet_number = self.next_packet_number.wrapping_add(1);
        packet_number
    }

    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::AckReceived(ack) => {
                self.handle_ack(&ack);
            }
            WorkerEvent::AckPending(packet_number) => {
                self.ack_queue.push_back(packet_number);
            }
            WorkerEvent::InitialReceived => {
                self.echo_pending = self.handshake_echo.is_some();
            }
        }
    }

    /// Removes the acknowledged entry from the window. Returns false if no such entry was
    /// outstanding, in which case congestion state is untouched.
    pub fn handle_ack(&mut self, ack: &frame::AckFrame) -> bool {
        if self.window.remove(ack.packet_number).is_none() {
            tracing::trace!(packet_number = ack.packet_number, "ignoring stale ack");
            return false;
        }

        let cwnd_prev = self.cc.cwnd();
        self.cc.handle_ack();

        if self.cc.cwnd() != cwnd_prev {
            tracing::trace!(
                packet_number = ack.packet_number,
                cwnd = self.cc.cwnd(),
                slow_start = self.cc.in_slow_start(),
                "window grew"
            );
        }

        true
    }

    /// Moves frames from `send_buffer` into the window until it holds `cwnd` entries. Returns
    /// the number of frames admitted.
    pub fn admit(&mut self, send_buffer: &mut SendBuffer) -> usize {
        let mut admitted = 0;

        while self.window.len() < self.cc.cwnd() as usize {
            let Some(frame) = send_buffer.pop_next() else {
                break;
            };

            let packet_number = self.take_packet_number();
            self.window.push(packet_number, frame);

            admitted += 1;
        }

        admitted
    }

    /// Sends every window entry which has never been sent or whose retransmission timer has
    /// expired. The first resend in a call counts as a loss.
    pub fn transmit(&mut self, now_ms: u64, ctx: &mut impl HostContext, shared: &Shared) {
        let mut loss_detected = false;

        for entry in self.window.iter_mut() {
            if !entry.is_due(now_ms, self.rto_ms) {
                continue;
            }

            let resend = entry.send_count > 0;

            let Some(size) =
                serial::write_stream_packet(&mut self.tx_buffer, entry.packet_number, &entry.frame)
            else {
                // Frames are sized for the datagram limit when they are queued
                tracing::warn!(packet_number = entry.packet_number, "stream frame too large");
                continue;
            };

            tracing::trace!(
                packet_number = entry.packet_number,
                stream_id = entry.frame.stream_id,
                offset = entry.frame.offset,
                resend,
                "sending stream packet"
            );

            ctx.send_frame(&self.tx_buffer[..size]);
            entry.mark_sent(now_ms);
            shared.count_sent(resend);

            loss_detected |= resend;
        }

        if loss_detected {
            self.cc.handle_drop();

            tracing::debug!(cwnd = self.cc.cwnd(), "loss detected, window shrunk");
        }
    }

    /// Sends one ack packet for every packet number in the ack queue.
    pub fn flush_acks(&mut self, ctx: &mut impl HostContext, shared: &Shared) {
        while let Some(acked_number) = self.ack_queue.pop_front() {
            let packet = frame::Packet::new(
                frame::PacketType::OneRtt,
                self.take_packet_number(),
                frame::Frame::Ack(frame::AckFrame {
                    packet_number: acked_number,
                    window_size: self.local_window,
                }),
            );

            if let Some(size) = serial::write_packet(&mut self.tx_buffer, &packet) {
                tracing::trace!(packet_number = acked_number, "sending ack");

                ctx.send_frame(&self.tx_buffer[..size]);
                shared.count_ack_sent();
            }
        }
    }

    fn flush_echo(&mut self, ctx: &mut impl HostContext) {
        if !std::mem::take(&mut self.echo_pending) {
            return;
        }

        if let Some(ref bytes) = self.handshake_echo {
            tracing::debug!("peer repeated its handshake, resending final Initial");
            ctx.send_frame(bytes);
        }
    }

    /// Whether some packet has gone unacknowledged for longer than the connection timeout.
    pub fn timed_out(&self, now_ms: u64) -> bool {
        self.window
            .oldest_first_sent_ms()
            .map_or(false, |sent_ms| {
                now_ms.saturating_sub(sent_ms) >= self.connection_timeout_ms
            })
    }

    /// Performs one pacing iteration, after pending events have been handled.
    pub fn poll(&mut self, ctx: &mut impl HostContext, shared: &Shared) {
        {
            let mut send_buffer = shared.lock_send_buffer();
            self.admit(&mut send_buffer);
            // Published under the buffer lock so that in-flight counts never miss a frame
            shared.publish(self);
        }

        let now_ms = shared.time_now_ms();

        if !shared.is_unreachable() {
            self.transmit(now_ms, ctx, shared);
            shared.publish(self);
        }

        self.flush_acks(ctx, shared);
        self.flush_echo(ctx);

        if !shared.is_closing() && self.timed_out(now_ms) {
            tracing::warn!(
                window_len = self.window.len(),
                "peer stopped acknowledging, terminating connection"
            );
            shared.terminate();
        }
    }
}

/// Sender worker loop. Returns once the connection is closing and the receiver worker has
/// hung up, after every owed ack has been sent.
pub fn run(
    mut sender: Sender,
    ctx: &mut impl HostContext,
    shared: &Shared,
    events: mpsc::Receiver<WorkerEvent>,
    poll_interval: time::Duration,
) {
    loop {
        let mut disconnected = false;

        match events.recv_timeout(poll_interval) {
            Ok(event) => sender.handle_event(event),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => disconnected = true,
        }

        while !disconnected {
            match events.try_recv() {
                Ok(event) => sender.handle_event(event),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => disconnected = true,
            }
        }

        sender.poll(ctx, shared);

        if disconnected && shared.is_closing() {
            break;
        }

        if disconnected {
            // Nothing more will arrive; pace the loop ourselves
            std::thread::sleep(poll_interval);
        }
    }

    debug_assert_eq!(sender.ack_queue_len(), 0);

    tracing::debug!(
        unacknowledged = sender.window_len(),
        "sender worker exiting"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::endpoint::tests::MockHostContext;

    fn test_config() -> Config {
        Config {
            retransmit_timeout_ms: 100,
            connection_timeout_ms: 1000,
            ..Default::default()
        }
    }

    fn stream_packets(ctx: &MockHostContext) -> Vec<(u32, frame::StreamFrame)> {
        ctx.packets()
            .into_iter()
            .filter_map(|packet| match packet.frame {
                frame::Frame::Stream(stream) => Some((packet.header.packet_number, stream)),
                frame::Frame::Ack(_) => None,
            })
            .collect()
    }

    fn ack(packet_number: u32) -> frame::AckFrame {
        frame::AckFrame {
            packet_number,
            window_size: 64,
        }
    }

    #[test]
    fn ack_is_idempotent() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let mut sender = Sender::new(&config, 64, 2, None);
        let mut buffer = SendBuffer::new(config.max_stream_payload());
        buffer.push(1, b"hello", true);

        assert_eq!(sender.admit(&mut buffer), 1);
        sender.transmit(0, &mut ctx, &shared);

        let packets = stream_packets(&ctx);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].0, 2);
        assert_eq!(&packets[0].1.payload[..], b"hello");

        assert_eq!(sender.cwnd(), 2);
        assert!(sender.handle_ack(&ack(2)));
        assert_eq!(sender.cwnd(), 4);
        assert_eq!(sender.window_len(), 0);

        // Duplicate
        assert!(!sender.handle_ack(&ack(2)));
        assert_eq!(sender.cwnd(), 4);

        // Unknown
        assert!(!sender.handle_ack(&ack(999)));
        assert_eq!(sender.cwnd(), 4);
    }

    #[test]
    fn retransmission_shrinks_window_once() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let mut sender = Sender::new(&config, 64, 2, None);
        let mut buffer = SendBuffer::new(10);
        buffer.push(1, &[0; 100], true);

        // Grow to 8 and fill the window
        sender.admit(&mut buffer);
        sender.transmit(0, &mut ctx, &shared);
        assert!(sender.handle_ack(&ack(2)));
        assert!(sender.handle_ack(&ack(3)));
        assert_eq!(sender.cwnd(), 8);
        assert!(sender.in_slow_start());

        assert_eq!(sender.admit(&mut buffer), 8);
        sender.transmit(10, &mut ctx, &shared);
        assert_eq!(stream_packets(&ctx).len(), 10);

        // Not yet due
        sender.transmit(50, &mut ctx, &shared);
        assert_eq!(stream_packets(&ctx).len(), 10);
        assert_eq!(sender.cwnd(), 8);

        // All eight expire together, which is a single loss event
        sender.transmit(110, &mut ctx, &shared);
        assert_eq!(stream_packets(&ctx).len(), 18);
        assert_eq!(sender.cwnd(), 4);
        assert!(!sender.in_slow_start());
        assert_eq!(shared.stats().packets_resent, 8);

        // Resends keep their packet numbers
        let resent: Vec<u32> = stream_packets(&ctx)[10..].iter().map(|(pn, _)| *pn).collect();
        assert_eq!(resent, (4..12).collect::<Vec<u32>>());
    }

    #[test]
    fn window_never_exceeds_peer_window() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let mut sender = Sender::new(&config, 3, 2, None);
        let mut buffer = SendBuffer::new(1);
        buffer.push(1, &[0; 200], true);

        let mut now_ms = 0;

        while !buffer.is_empty() || sender.window_len() > 0 {
            sender.admit(&mut buffer);
            assert!(sender.window_len() <= 3);

            sender.transmit(now_ms, &mut ctx, &shared);

            for (pn, _) in stream_packets(&ctx) {
                sender.handle_ack(&ack(pn));
                assert!(sender.cwnd() <= 3);
                assert!(sender.cwnd() >= 1);
            }

            ctx.frames.clear();
            now_ms += 1;
        }

        assert_eq!(sender.cwnd(), 3);
    }

    #[test]
    fn two_full_frames() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let mut sender = Sender::new(&config, 64, 2, None);
        shared.lock_send_buffer().push(5, &vec![0xAB; 2 * 1479], true);

        sender.poll(&mut ctx, &shared);

        assert_eq!(ctx.frames.len(), 2);
        assert!(ctx.frames.iter().all(|bytes| bytes.len() == 1500));
        assert_eq!(sender.window_len(), 2);
        assert_eq!(shared.in_flight(), 2);

        let packets = stream_packets(&ctx);
        assert!(!packets[0].1.finished);
        assert!(packets[1].1.finished);

        for (pn, _) in packets {
            assert!(sender.handle_ack(&ack(pn)));
        }

        assert_eq!(sender.window_len(), 0);

        sender.poll(&mut ctx, &shared);
        assert_eq!(shared.in_flight(), 0);
        assert_eq!(shared.stats().packets_sent, 2);
    }

    #[test]
    fn close_flushes_pending_acks() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let sender = Sender::new(&config, 64, 1, None);

        let (events_tx, events_rx) = mpsc::channel();

        for pn in 10..20 {
            events_tx.send(WorkerEvent::AckPending(pn)).unwrap();
        }

        drop(events_tx);
        shared.begin_close();

        run(
            sender,
            &mut ctx,
            &shared,
            events_rx,
            time::Duration::from_millis(5),
        );

        let acks: Vec<(u32, frame::AckFrame)> = ctx
            .packets()
            .into_iter()
            .map(|packet| match packet.frame {
                frame::Frame::Ack(ack) => (packet.header.packet_number, ack),
                frame::Frame::Stream(_) => panic!("unexpected stream frame"),
            })
            .collect();

        assert_eq!(acks.len(), 10);

        for (i, (pn, ack)) in acks.into_iter().enumerate() {
            // Acks use fresh packet numbers of their own
            assert_eq!(pn, 1 + i as u32);
            assert_eq!(ack.packet_number, 10 + i as u32);
            assert_eq!(ack.window_size, config.receive_window);
        }

        assert_eq!(shared.stats().acks_sent, 10);
    }

    #[test]
    fn unacknowledged_packet_terminates() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let mut sender = Sender::new(&config, 64, 2, None);
        let mut buffer = SendBuffer::new(100);
        buffer.push(1, b"anyone there?", true);

        sender.admit(&mut buffer);
        sender.transmit(0, &mut ctx, &shared);

        assert!(!sender.timed_out(999));
        assert!(sender.timed_out(1000));

        // An ack clears the condition
        assert!(sender.handle_ack(&ack(2)));
        assert!(!sender.timed_out(5000));
    }

    #[test]
    fn repeated_initial_is_echoed() {
        let config = test_config();
        let shared = Shared::new(config.max_stream_payload());
        let mut ctx = MockHostContext::new();

        let echo: Box<[u8]> = serial::encode_packet(&frame::Packet::new(
            frame::PacketType::Initial,
            1,
            frame::Frame::Ack(ack(0)),
        ));

        let mut sender = Sender::new(&config, 64, 2, Some(echo.clone()));

        sender.poll(&mut ctx, &shared);
        assert!(ctx.frames.is_empty());

        sender.handle_event(WorkerEvent::InitialReceived);
        sender.poll(&mut ctx, &shared);
        assert_eq!(ctx.frames, vec![echo]);

        // Only once per repeat
        sender.poll(&mut ctx, &shared);
        assert_eq!(ctx.frames.len(), 1);

        // Without a handshake packet to echo, nothing is sent
        let mut ctx = MockHostContext::new();
        let mut sender = Sender::new(&config, 64, 1, None);
        sender.handle_event(WorkerEvent::InitialReceived);
        sender.poll(&mut ctx, &shared);
        assert!(ctx.frames.is_empty());
    }
}
