/*

minquic is a small QUIC-like transport: reliable, multiplexed byte streams carried over plain
UDP datagrams between exactly two peers.

# Packets and frames

Every datagram is one packet: a packet header followed by one frame. All integers are
big-endian.

  packet header   packet_type (u8) | packet_number (u32)
  frame header    frame_type (u8)
  ack frame       packet_number (u32) | window_size (u32)
  stream frame    stream_id (u32) | offset (u64) | length (u16) | finished (u8) | payload

Packet types are Initial (1) and OneRtt (2). Frame types are Ack (1) and Stream (2). A datagram
never exceeds 1500 bytes, which leaves 1479 bytes of payload for a stream frame.

# Handshake

The client sends Initial(0) carrying an ack frame whose window_size field advertises the number
of packets it is willing to have in flight. The server answers with its own Initial carrying its
window, and the client confirms with Initial(1). Each side resends on a timeout, a bounded number
of times. Data packets start at packet number 2 on the client and 1 on the server.

# Streams

A message sent on a stream is split into stream frames. The final frame of each message has the
finished bit set. The receiver delivers a message once the frames it holds cover every byte from
the start of the message through a finished frame. Further messages on the same stream continue
at the offset where the previous one ended. A message may also be sent in parts, only the last of
which sets the finished bit, and read in parts as its bytes arrive.

A resent packet keeps its packet number, which is how the receiver tells a resend from new data.
A new packet at an offset below what was already delivered starts the stream over from zero. A
new packet at an offset still held is left unacknowledged until the held message is delivered.

# Reliability

Every stream packet is acknowledged individually by an ack frame naming its packet number. The
sender keeps unacknowledged packets in a window and resends any packet which has not been
acknowledged within the retransmission timeout.

# Congestion window

The number of packets in the window is bounded by cwnd, which never exceeds the window advertised
by the peer during the handshake. In slow start each ack doubles cwnd:

  cwnd <- cwnd * 2

Once cwnd exceeds the slow start threshold, each ack increases cwnd by one:

  cwnd <- cwnd + 1

Resending a packet is taken as a loss, which halves cwnd and ends slow start:

  cwnd <- max(1, cwnd / 2)

# Threads

Each connection runs two worker threads. The receiver thread reads datagrams, buffers stream
frames for the application, and forwards acks over a channel. The sender thread owns the window
and the congestion state exclusively; it consumes that channel, admits queued frames, resends
expired packets, and transmits acks.

*/

pub mod client;
mod config;
pub mod connection;
mod endpoint;
pub mod frame;
mod handshake;
pub mod server;
pub mod simulator;
mod socket;

pub use config::Config;
pub use connection::{accept_one, accept_one_with_config, connect_to, connect_with_config};
pub use connection::{Connection, Stats};
pub use simulator::LinkConfig;

pub type Client = client::Client;
pub type Server = server::Server;

/// Errors surfaced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A datagram could not be decoded. Such datagrams are dropped internally.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
    /// The peer did not complete the handshake within the retry budget.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The peer stopped responding, or the socket reported it as gone.
    #[error("peer unreachable")]
    PeerUnreachable,
    /// The connection was used after it was closed.
    #[error("connection used after close")]
    UseAfterClose,
    /// A facade operation was attempted before a connection was established.
    #[error("not connected")]
    NotConnected,
    /// Socket setup failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
