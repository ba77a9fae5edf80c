use std::net;

use crate::connection;
use crate::Config;
use crate::Connection;
use crate::Error;
use crate::Result;

/// A client holding at most one connection at a time.
pub struct Client {
    config: Config,
    connection: Option<Connection>,
}

impl Client {
    /// Equivalent to calling [`Client::with_config`] with default configuration.
    pub fn new() -> Self {
        Self::with_config(Default::default())
    }

    /// Creates an unconnected client which will use `config` for each connection.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// Connects to the server at `server_addr`, closing any previous connection first.
    pub fn connect<A>(&mut self, server_addr: A) -> Result<()>
    where
        A: net::ToSocketAddrs,
    {
        self.close();

        let connection = connection::connect_with_config(server_addr, self.config.clone())?;
        self.connection = Some(connection);

        Ok(())
    }

    /// Returns the current connection.
    pub fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::NotConnected)
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

    /// Closes and forgets the current connection, if any.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
