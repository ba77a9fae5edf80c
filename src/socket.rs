use std::net;
use std::sync::Arc;
use std::time;

use crate::simulator;

const SOCKET_POLLING_KEY: usize = 0;

/// Send half of a socket, bound to a single peer.
pub struct SocketTx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Destination of every frame
    peer_addr: net::SocketAddr,
    // Whether the socket has been connected to peer_addr
    connected: bool,
    // Optional fault injection
    link: Option<simulator::LossyLink>,
}

/// Receive half of a socket.
pub struct SocketRx {
    // Reference to non-blocking socket
    socket: Arc<net::UdpSocket>,
    // Cached from socket initialization
    local_addr: net::SocketAddr,
    // Polling objects
    poller: polling::Poller,
    poller_events: polling::Events,
    // Always-allocated receive buffer
    recv_buffer: Box<[u8]>,
}

impl SocketTx {
    pub fn new(socket: Arc<net::UdpSocket>, peer_addr: net::SocketAddr, connected: bool) -> Self {
        Self {
            socket,
            peer_addr,
            connected,
            link: None,
        }
    }

    pub fn set_link(&mut self, config: &simulator::LinkConfig) {
        self.link = if config.is_transparent() {
            None
        } else {
            Some(simulator::LossyLink::new(config.clone()))
        };
    }

    pub fn send(&mut self, frame: &[u8]) {
        let copies = match self.link {
            Some(ref mut link) => link.judge().copies(),
            None => 1,
        };

        for _ in 0..copies {
            let result = if self.connected {
                self.socket.send(frame)
            } else {
                self.socket.send_to(frame, self.peer_addr)
            };

            if let Err(err) = result {
                // Loss is handled by retransmission; the receive half reports dead peers
                tracing::trace!(peer = %self.peer_addr, error = %err, "datagram send failed");
            }
        }
    }

    pub fn peer_addr(&self) -> net::SocketAddr {
        self.peer_addr
    }
}

impl SocketRx {
    fn new(socket: Arc<net::UdpSocket>, frame_size_max: usize) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        let poller = polling::Poller::new()?;

        unsafe {
            poller.add(&*socket, polling::Event::readable(SOCKET_POLLING_KEY))?;
        }

        Ok(Self {
            socket,
            local_addr,
            poller,
            poller_events: polling::Events::new(),
            recv_buffer: vec![0; frame_size_max].into_boxed_slice(),
        })
    }

    /// If a frame can be read from the socket, returns the frame. Returns Ok(None) otherwise.
    pub fn try_read_frame(&mut self) -> std::io::Result<Option<(&[u8], net::SocketAddr)>> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((frame_len, sender_addr)) => {
                let frame_bytes = &self.recv_buffer[..frame_len];
                Ok(Some((frame_bytes, sender_addr)))
            }
            Err(err) => match err.kind() {
                // The only acceptable error is WouldBlock, indicating no packet
                std::io::ErrorKind::WouldBlock => Ok(None),
                _ => Err(err),
            },
        }
    }

    /// Blocks for a duration of up to `timeout` for an incoming frame and returns it. Returns
    /// Ok(None) if no frame could be read in the alloted time, or if polling awoke spuriously.
    pub fn wait_for_frame(
        &mut self,
        timeout: Option<time::Duration>,
    ) -> std::io::Result<Option<(&[u8], net::SocketAddr)>> {
        // Wait for a readable event (must be done prior to each wait() call)
        self.poller
            .modify(&*self.socket, polling::Event::readable(SOCKET_POLLING_KEY))?;

        self.poller_events.clear();

        let n = self.poller.wait(&mut self.poller_events, timeout)?;

        if n > 0 {
            // The socket is readable - read in confidence
            self.try_read_frame()
        } else {
            Ok(None)
        }
    }

    pub fn local_addr(&self) -> net::SocketAddr {
        self.local_addr
    }
}

impl Drop for SocketRx {
    fn drop(&mut self) {
        let _ = self.poller.delete(&*self.socket);
    }
}

/// Binds a socket to `bind_address` and connects it to `connect_address`. A connected socket
/// reports ICMP errors from the peer on receive.
pub fn new_connected<A, B>(
    bind_address: A,
    connect_address: B,
    frame_size_max: usize,
) -> std::io::Result<(SocketTx, SocketRx)>
where
    A: net::ToSocketAddrs,
    B: net::ToSocketAddrs,
{
    let socket = net::UdpSocket::bind(bind_address)?;
    socket.connect(connect_address)?;

    let peer_addr = socket.peer_addr()?;

    let socket_rc = Arc::new(socket);

    let rx = SocketRx::new(Arc::clone(&socket_rc), frame_size_max)?;
    let tx = SocketTx::new(socket_rc, peer_addr, true);

    Ok((tx, rx))
}

/// Duplicates an already bound socket handle for use by a listening endpoint. The caller's
/// handle shares the underlying socket, which is left in non-blocking mode.
pub fn new_shared(
    socket: &net::UdpSocket,
    frame_size_max: usize,
) -> std::io::Result<(Arc<net::UdpSocket>, SocketRx)> {
    let socket_rc = Arc::new(socket.try_clone()?);

    let rx = SocketRx::new(Arc::clone(&socket_rc), frame_size_max)?;

    Ok((socket_rc, rx))
}
