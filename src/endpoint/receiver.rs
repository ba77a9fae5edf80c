use std::net;
use std::sync::mpsc;
use std::time;

use super::packet_log::PacketLog;
use super::{Shared, WorkerEvent};

use crate::frame;
use crate::frame::serial;
use crate::socket;

/// Receiver worker state.
pub struct Receiver {
    // Datagrams from any other address are dropped
    peer_addr: net::SocketAddr,
    // Whether a repeated handshake Initial from the peer should be answered
    echo_initials: bool,
    events: mpsc::Sender<WorkerEvent>,
    // Packets already taken from the peer
    received: PacketLog,
}

impl Receiver {
    pub fn new(
        peer_addr: net::SocketAddr,
        echo_initials: bool,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            peer_addr,
            echo_initials,
            events,
            received: PacketLog::new(),
        }
    }

    fn notify(&self, event: WorkerEvent) {
        // The sender worker outlives us; a failed send means it already gave up
        let _ = self.events.send(event);
    }

    /// Processes a single inbound datagram.
    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        sender_addr: net::SocketAddr,
        shared: &Shared,
    ) {
        if sender_addr != self.peer_addr {
            tracing::trace!(%sender_addr, "ignoring datagram from foreign address");
            return;
        }

        let packet = match serial::decode_packet(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::trace!(error = %err, len = bytes.len(), "dropping datagram");
                return;
            }
        };

        let packet_number = packet.header.packet_number;

        match packet.header.packet_type {
            frame::PacketType::Initial => {
                tracing::trace!(packet_number, "stale handshake packet");

                if self.echo_initials {
                    self.notify(WorkerEvent::InitialReceived);
                }
            }
            frame::PacketType::OneRtt => match packet.frame {
                frame::Frame::Ack(ack) => {
                    tracing::trace!(packet_number = ack.packet_number, "received ack");

                    // Keeps the log's ranges contiguous
                    self.received.insert(packet_number);

                    self.notify(WorkerEvent::AckReceived(ack));
                }
                frame::Frame::Stream(stream) => self.handle_stream(packet_number, stream, shared),
            },
        }
    }

    fn handle_stream(&mut self, packet_number: u32, stream: frame::StreamFrame, shared: &Shared) {
        let stream_id = stream.stream_id;
        let offset = stream.offset;

        if self.received.contains(packet_number) {
            tracing::trace!(packet_number, stream_id, offset, "duplicate stream packet");

            // Our first ack may have been lost
            self.notify(WorkerEvent::AckPending(packet_number));
            return;
        }

        if !shared.deliver(stream) {
            // Left unacknowledged, so the peer resends it once the held frame is delivered
            tracing::warn!(
                packet_number,
                stream_id,
                offset,
                "stream frame conflicts with undelivered data"
            );
            return;
        }

        tracing::trace!(packet_number, stream_id, offset, "received stream packet");

        self.received.insert(packet_number);
        self.notify(WorkerEvent::AckPending(packet_number));
    }
}

/// Receiver worker loop. Returns once the connection is closing, or after terminating it
/// because the socket failed.
pub fn run(
    mut receiver: Receiver,
    mut socket_rx: socket::SocketRx,
    shared: &Shared,
    poll_interval: time::Duration,
) {
    while !shared.is_closing() {
        match socket_rx.wait_for_frame(Some(poll_interval)) {
            Ok(Some((bytes, sender_addr))) => {
                receiver.handle_datagram(bytes, sender_addr, shared);
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "socket receive failed, terminating connection");
                shared.terminate();
                break;
            }
        }

        // Drain whatever else is queued without blocking
        loop {
            match socket_rx.try_read_frame() {
                Ok(Some((bytes, sender_addr))) => {
                    receiver.handle_datagram(bytes, sender_addr, shared);
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "socket receive failed, terminating connection");
                    shared.terminate();
                    break;
                }
            }
        }
    }

    tracing::debug!("receiver worker exiting");
}
