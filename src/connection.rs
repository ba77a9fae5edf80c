use std::net;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time;

use crate::endpoint;
use crate::endpoint::receiver::Receiver;
use crate::endpoint::sender::Sender;
use crate::handshake;
use crate::socket;
use crate::Config;
use crate::Error;
use crate::Result;

pub use crate::endpoint::Stats;

// Large enough for any UDP datagram, so a peer with a larger datagram limit is never truncated
const RECV_BUFFER_SIZE: usize = 65_535;

struct SocketContext {
    socket_tx: socket::SocketTx,
}

impl endpoint::HostContext for SocketContext {
    fn send_frame(&mut self, frame_bytes: &[u8]) {
        self.socket_tx.send(frame_bytes);
    }
}

fn spawn_sender(
    sender: Sender,
    socket_tx: socket::SocketTx,
    shared: &Arc<endpoint::Shared>,
    events_rx: mpsc::Receiver<endpoint::WorkerEvent>,
    poll_interval: time::Duration,
) -> std::io::Result<thread::JoinHandle<()>> {
    let shared = Arc::clone(shared);
    let mut ctx = SocketContext { socket_tx };

    thread::Builder::new()
        .name("minquic-sender".into())
        .spawn(move || endpoint::sender::run(sender, &mut ctx, &shared, events_rx, poll_interval))
}

struct Workers {
    sender: thread::JoinHandle<()>,
    receiver: thread::JoinHandle<()>,
}

/// An established connection to a single peer.
///
/// Data is sent and received on numbered streams, either as whole messages or as parts which
/// the sender closes with an end flag. Data on the same stream is delivered in the order it was
/// sent; there is no ordering between streams.
///
/// A connection is closed with [`Connection::close`], or when it is dropped.
pub struct Connection {
    shared: Arc<endpoint::Shared>,
    peer_addr: net::SocketAddr,
    local_addr: net::SocketAddr,
    linger: time::Duration,
    poll_interval: time::Duration,
    workers: Mutex<Option<Workers>>,
    closed: AtomicBool,
}

impl Connection {
    fn start(
        config: Config,
        established: handshake::Established,
        mut socket_tx: socket::SocketTx,
        socket_rx: socket::SocketRx,
    ) -> Result<Self> {
        let shared = Arc::new(endpoint::Shared::new(config.max_stream_payload()));

        let peer_addr = established.peer_addr;
        let local_addr = socket_rx.local_addr();
        let poll_interval = config.poll_interval();

        let (events_tx, events_rx) = mpsc::channel();

        let mut receiver = Receiver::new(peer_addr, established.echo.is_some(), events_tx);

        if let Some(ref bytes) = established.first_datagram {
            receiver.handle_datagram(bytes, peer_addr, &shared);
        }

        let sender = Sender::new(
            &config,
            established.peer_window,
            established.next_packet_number,
            established.echo,
        );

        // Faults apply to data only; the handshake always runs over a clean link
        socket_tx.set_link(&config.link);

        let sender = spawn_sender(sender, socket_tx, &shared, events_rx, poll_interval)?;

        let receiver = {
            let worker_shared = Arc::clone(&shared);

            match thread::Builder::new()
                .name("minquic-receiver".into())
                .spawn(move || {
                    endpoint::receiver::run(receiver, socket_rx, &worker_shared, poll_interval)
                }) {
                Ok(handle) => handle,
                Err(err) => {
                    // The receiver and its channel end are gone, so the sender exits once closing
                    shared.begin_close();
                    let _ = sender.join();
                    return Err(err.into());
                }
            }
        };

        tracing::debug!(peer = %peer_addr, local = %local_addr, "connection established");

        Ok(Self {
            shared,
            peer_addr,
            local_addr,
            linger: time::Duration::from_millis(config.linger_ms),
            poll_interval,
            workers: Mutex::new(Some(Workers { sender, receiver })),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats()
    }

    /// Whether the connection has been closed locally or terminated by a timeout.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.shared.is_closing()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose);
        }

        Ok(())
    }

    /// Queues `data` as a single message on `stream_id`. Returns immediately; delivery happens
    /// in the background.
    pub fn send(&self, stream_id: u32, data: &[u8]) -> Result<()> {
        self.send_part(stream_id, data, true)
    }

    /// Queues `data` on `stream_id` as part of the current message, and closes the message if
    /// `end` is set. Parts sent without `end` are delivered as soon as they arrive to
    /// [`Connection::recv_part`], and joined into one message by [`Connection::recv`].
    pub fn send_part(&self, stream_id: u32, data: &[u8], end: bool) -> Result<()> {
        self.check_open()?;

        if self.shared.is_unreachable() {
            return Err(Error::PeerUnreachable);
        }

        let frame_count = self.shared.lock_send_buffer().push(stream_id, data, end);

        tracing::trace!(stream_id, len = data.len(), end, frame_count, "queued data");

        Ok(())
    }

    fn finish_recv<T>(&self, received: Option<T>) -> Result<Option<T>> {
        match received {
            Some(received) => Ok(Some(received)),
            None if self.shared.is_unreachable() => Err(Error::PeerUnreachable),
            None => Ok(None),
        }
    }

    /// Blocks until a complete message arrives on any stream and returns it along with its
    /// stream id. Returns `Ok(None)` if the connection is closed while waiting.
    pub fn recv(&self) -> Result<Option<(u32, Vec<u8>)>> {
        self.check_open()?;
        self.finish_recv(self.shared.wait_complete(None))
    }

    /// Like [`Connection::recv`], but gives up after `timeout`.
    pub fn recv_timeout(&self, timeout: time::Duration) -> Result<Option<(u32, Vec<u8>)>> {
        self.check_open()?;
        self.finish_recv(self.shared.wait_complete(Some(timeout)))
    }

    /// Returns a complete message if one is available, without blocking.
    pub fn try_recv(&self) -> Result<Option<(u32, Vec<u8>)>> {
        self.check_open()?;
        self.finish_recv(self.shared.try_complete())
    }

    /// Blocks until in-order data arrives on any stream, and returns as much of it as is
    /// available without crossing the end of a message. The flag is set when the returned data
    /// ends a message.
    ///
    /// Taking part of a message this way leaves only its remainder for [`Connection::recv`].
    pub fn recv_part(&self) -> Result<Option<(u32, Vec<u8>, bool)>> {
        self.check_open()?;
        self.finish_recv(self.shared.wait_part(None))
    }

    pub fn recv_part_timeout(
        &self,
        timeout: time::Duration,
    ) -> Result<Option<(u32, Vec<u8>, bool)>> {
        self.check_open()?;
        self.finish_recv(self.shared.wait_part(Some(timeout)))
    }

    pub fn try_recv_part(&self) -> Result<Option<(u32, Vec<u8>, bool)>> {
        self.check_open()?;
        self.finish_recv(self.shared.try_part())
    }

    /// Closes the connection. Waits up to the configured linger time for outstanding data to be
    /// acknowledged, then stops both workers. Every ack owed to the peer is sent before this
    /// returns. Calling `close` more than once has no further effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if !self.linger.is_zero() {
            let deadline = time::Instant::now() + self.linger;

            while self.shared.in_flight() > 0
                && !self.shared.is_closing()
                && time::Instant::now() < deadline
            {
                thread::sleep(self.poll_interval);
            }
        }

        self.shared.begin_close();

        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(workers) = workers {
            // The receiver goes first so that the sender sees its channel hang up
            if workers.receiver.join().is_err() {
                tracing::warn!("receiver worker panicked");
            }
            if workers.sender.join().is_err() {
                tracing::warn!("sender worker panicked");
            }
        }

        tracing::debug!(peer = %self.peer_addr, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve<A: net::ToSocketAddrs>(addr: A) -> Result<net::SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "address resolved to nothing",
        )
        .into()
    })
}

/// Equivalent to calling [`connect_with_config`] with default configuration.
pub fn connect_to<A: net::ToSocketAddrs>(addr: A) -> Result<Connection> {
    connect_with_config(addr, Config::default())
}

/// Binds a UDP socket to an ephemeral port, performs a handshake with the server at `addr`,
/// and returns the established connection.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn connect_with_config<A: net::ToSocketAddrs>(addr: A, config: Config) -> Result<Connection> {
    config.validate();

    let peer_addr = resolve(addr)?;

    let bind_addr: net::SocketAddr = if peer_addr.is_ipv4() {
        (net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (net::Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let (mut socket_tx, mut socket_rx) =
        socket::new_connected(bind_addr, peer_addr, RECV_BUFFER_SIZE)?;

    let established = handshake::client(&mut socket_tx, &mut socket_rx, &config)?;

    Connection::start(config, established, socket_tx, socket_rx)
}

/// Equivalent to calling [`accept_one_with_config`] with default configuration.
pub fn accept_one(socket: &net::UdpSocket) -> Result<Option<(Connection, net::SocketAddr)>> {
    accept_one_with_config(socket, Config::default())
}

/// Waits on an already bound `socket` for a single client to complete a handshake, and returns
/// the resulting connection along with the client's address. Returns `Ok(None)` if the accept
/// timeout elapses or a client abandons its handshake.
///
/// The connection shares the underlying socket with the caller, and the socket is switched to
/// non-blocking mode.
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn accept_one_with_config(
    socket: &net::UdpSocket,
    config: Config,
) -> Result<Option<(Connection, net::SocketAddr)>> {
    config.validate();

    let (socket, mut socket_rx) = socket::new_shared(socket, RECV_BUFFER_SIZE)?;

    let Some(established) = handshake::server(&socket, &mut socket_rx, &config) else {
        return Ok(None);
    };

    let peer_addr = established.peer_addr;
    let socket_tx = socket::SocketTx::new(socket, peer_addr, false);

    let connection = Connection::start(config, established, socket_tx, socket_rx)?;

    Ok(Some((connection, peer_addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_exits_when_receiver_never_starts() {
        let config = Config::default();
        let shared = Arc::new(endpoint::Shared::new(config.max_stream_payload()));

        let peer = net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = Arc::new(net::UdpSocket::bind("127.0.0.1:0").unwrap());
        let socket_tx = socket::SocketTx::new(local, peer.local_addr().unwrap(), false);

        let (events_tx, events_rx) = mpsc::channel();
        events_tx.send(endpoint::WorkerEvent::AckPending(7)).unwrap();

        let sender = Sender::new(&config, 64, 1, None);
        let handle = spawn_sender(
            sender,
            socket_tx,
            &shared,
            events_rx,
            time::Duration::from_millis(5),
        )
        .unwrap();

        // Same teardown as a failed receiver spawn: the channel end is dropped, then closing
        drop(events_tx);
        shared.begin_close();

        handle.join().unwrap();

        // The owed ack still went out
        assert_eq!(shared.stats().acks_sent, 1);

        let mut buf = [0; 64];
        peer.set_read_timeout(Some(time::Duration::from_secs(1))).unwrap();
        let (len, _) = peer.recv_from(&mut buf).unwrap();
        let packet = crate::frame::serial::decode_packet(&buf[..len]).unwrap();
        assert!(matches!(
            packet.frame,
            crate::frame::Frame::Ack(crate::frame::AckFrame { packet_number: 7, .. })
        ));
    }
}
