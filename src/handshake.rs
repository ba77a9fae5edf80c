// Three-packet handshake:
//
//   client                          server
//     | -- Initial(0) Ack(0, wnd) --> |
//     | <-- Initial(0) Ack(0, wnd) -- |
//     | -- Initial(1) Ack(0, wnd) --> |
//
// Each side learns the window advertised by the other. The client resends its first packet if
// no reply arrives in time, and the server resends its reply until the client confirms. A
// server also considers the handshake complete if the client's confirmation is lost but data
// from the client arrives.

use std::net;
use std::sync::Arc;
use std::time;

use crate::frame;
use crate::frame::serial;
use crate::socket;
use crate::Config;
use crate::Error;
use crate::Result;

/// Outcome of a successful handshake.
pub struct Established {
    pub peer_addr: net::SocketAddr,
    // Window advertised by the peer, in packets
    pub peer_window: u32,
    // First packet number available for data
    pub next_packet_number: u32,
    // Client only: the confirming packet, resent if the server repeats its reply
    pub echo: Option<Box<[u8]>>,
    // Server only: a data packet which completed the handshake in lieu of a confirmation
    pub first_datagram: Option<Box<[u8]>>,
}

fn initial_packet(packet_number: u32, acked_number: u32, window_size: u32) -> Box<[u8]> {
    serial::encode_packet(&frame::Packet::new(
        frame::PacketType::Initial,
        packet_number,
        frame::Frame::Ack(frame::AckFrame {
            packet_number: acked_number,
            window_size,
        }),
    ))
}

/// Returns the packet number and ack frame of an Initial packet, if `bytes` holds one.
fn read_initial(bytes: &[u8]) -> Option<(u32, frame::AckFrame)> {
    match serial::decode_packet(bytes) {
        Ok(frame::Packet {
            header:
                frame::PacketHeader {
                    packet_type: frame::PacketType::Initial,
                    packet_number,
                },
            frame: frame::Frame::Ack(ack),
        }) => Some((packet_number, ack)),
        Ok(_) => None,
        Err(err) => {
            tracing::trace!(error = %err, "ignoring malformed handshake datagram");
            None
        }
    }
}

fn remaining(deadline: time::Instant) -> Option<time::Duration> {
    deadline.checked_duration_since(time::Instant::now())
}

/// Performs the client half of the handshake over a connected socket.
pub fn client(
    socket_tx: &mut socket::SocketTx,
    socket_rx: &mut socket::SocketRx,
    config: &Config,
) -> Result<Established> {
    let hello = initial_packet(0, 0, config.receive_window);

    for attempt in 0..config.handshake_attempts {
        tracing::debug!(peer = %socket_tx.peer_addr(), attempt, "sending Initial");

        socket_tx.send(&hello);

        let deadline = time::Instant::now() + config.handshake_timeout();

        while let Some(timeout) = remaining(deadline) {
            match socket_rx.wait_for_frame(Some(timeout)) {
                Ok(Some((bytes, _))) => {
                    let Some((server_number, ack)) = read_initial(bytes) else {
                        continue;
                    };

                    tracing::debug!(
                        peer = %socket_tx.peer_addr(),
                        peer_window = ack.window_size,
                        "received Initial reply"
                    );

                    let confirm = initial_packet(1, server_number, config.receive_window);
                    socket_tx.send(&confirm);

                    return Ok(Established {
                        peer_addr: socket_tx.peer_addr(),
                        peer_window: ack.window_size.max(1),
                        next_packet_number: 2,
                        echo: Some(confirm),
                        first_datagram: None,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    // Most likely nothing is listening yet; try again after the timeout
                    tracing::debug!(error = %err, "socket error during handshake");
                    std::thread::sleep(timeout);
                }
            }
        }
    }

    tracing::debug!(peer = %socket_tx.peer_addr(), "handshake timed out");

    Err(Error::HandshakeTimeout)
}

/// Waits for a client's first Initial. Returns its address, packet number, and advertised
/// window.
fn await_hello(
    socket_rx: &mut socket::SocketRx,
    config: &Config,
) -> Option<(net::SocketAddr, u32, u32)> {
    let deadline = config
        .accept_timeout_ms
        .map(|ms| time::Instant::now() + time::Duration::from_millis(ms));

    loop {
        let timeout = match deadline {
            Some(deadline) => Some(remaining(deadline)?),
            None => None,
        };

        match socket_rx.wait_for_frame(timeout) {
            Ok(Some((bytes, sender_addr))) => {
                if let Some((client_number, ack)) = read_initial(bytes) {
                    return Some((sender_addr, client_number, ack.window_size));
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "socket error while accepting");
                return None;
            }
        }
    }
}

/// Performs the server half of the handshake on a shared, unconnected socket. Returns `None`
/// if no client completes the handshake.
pub fn server(
    socket: &Arc<net::UdpSocket>,
    socket_rx: &mut socket::SocketRx,
    config: &Config,
) -> Option<Established> {
    let (peer_addr, client_number, peer_window) = await_hello(socket_rx, config)?;

    tracing::debug!(peer = %peer_addr, peer_window, "received Initial");

    let reply = initial_packet(0, client_number, config.receive_window);

    for attempt in 0..config.handshake_attempts {
        tracing::debug!(peer = %peer_addr, attempt, "sending Initial reply");

        if let Err(err) = socket.send_to(&reply, peer_addr) {
            tracing::trace!(peer = %peer_addr, error = %err, "datagram send failed");
        }

        let deadline = time::Instant::now() + config.handshake_timeout();

        while let Some(timeout) = remaining(deadline) {
            let (bytes, sender_addr) = match socket_rx.wait_for_frame(Some(timeout)) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "socket error during handshake");
                    return None;
                }
            };

            if sender_addr != peer_addr {
                continue;
            }

            let packet = match serial::decode_packet(bytes) {
                Ok(packet) => packet,
                Err(_) => continue,
            };

            let first_datagram = match packet.header.packet_type {
                frame::PacketType::Initial if packet.header.packet_number == 0 => {
                    // Our reply was lost and the client asked again
                    if let Err(err) = socket.send_to(&reply, peer_addr) {
                        tracing::trace!(peer = %peer_addr, error = %err, "datagram send failed");
                    }
                    continue;
                }
                frame::PacketType::Initial => None,
                frame::PacketType::OneRtt => Some(Box::<[u8]>::from(bytes)),
            };

            tracing::debug!(
                peer = %peer_addr,
                confirmed = first_datagram.is_none(),
                "handshake complete"
            );

            return Some(Established {
                peer_addr,
                peer_window: peer_window.max(1),
                next_packet_number: 1,
                echo: None,
                first_datagram,
            });
        }
    }

    tracing::debug!(peer = %peer_addr, "client never confirmed handshake");

    None
}
