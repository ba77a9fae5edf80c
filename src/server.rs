use std::net;

use crate::connection;
use crate::Config;
use crate::Connection;
use crate::Error;
use crate::Result;

/// A server which accepts one client at a time on a bound socket.
pub struct Server {
    config: Config,
    socket: net::UdpSocket,
    connection: Option<(Connection, net::SocketAddr)>,
}

impl Server {
    /// Equivalent to calling [`Server::listen_with_config`] with default configuration.
    pub fn listen<A>(bind_addr: A) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        Self::listen_with_config(bind_addr, Default::default())
    }

    /// Binds a UDP socket at the provided address. No connection is accepted until
    /// [`Server::accept`] is called.
    pub fn listen_with_config<A>(bind_addr: A, config: Config) -> Result<Self>
    where
        A: net::ToSocketAddrs,
    {
        let socket = net::UdpSocket::bind(bind_addr)?;

        tracing::debug!(local = %socket.local_addr()?, "listening");

        Ok(Self {
            config,
            socket,
            connection: None,
        })
    }

    /// Returns the local address of the listening socket.
    pub fn local_addr(&self) -> Result<net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Closes any current connection, then waits for a client to connect. Returns the client's
    /// address, or `None` if no client completed a handshake.
    pub fn accept(&mut self) -> Result<Option<net::SocketAddr>> {
        self.close();

        match connection::accept_one_with_config(&self.socket, self.config.clone())? {
            Some((connection, peer_addr)) => {
                self.connection = Some((connection, peer_addr));
                Ok(Some(peer_addr))
            }
            None => Ok(None),
        }
    }

    /// Returns the current connection.
    pub fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .map(|(connection, _)| connection)
            .ok_or(Error::NotConnected)
    }

    pub fn send(&self, stream_id: u32, data: &[u8]) -> Result<()> {
        self.connection()?.send(stream_id, data)
    }

    pub fn send_part(&self, stream_id: u32, data: &[u8], end: bool) -> Result<()> {
        self.connection()?.send_part(stream_id, data, end)
    }

    pub fn recv(&self) -> Result<Option<(u32, Vec<u8>)>> {
        self.connection()?.recv()
    }

    pub fn recv_part(&self) -> Result<Option<(u32, Vec<u8>, bool)>> {
        self.connection()?.recv_part()
    }

    /// Closes and forgets the current connection, if any. The socket remains bound.
    pub fn close(&mut self) {
        if let Some((connection, _)) = self.connection.take() {
            connection.close();
        }
    }
}
