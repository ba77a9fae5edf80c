use std::net;
use std::thread;

use minquic::{Config, Connection};

pub fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

pub fn digest(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Short timeouts, so that failures surface quickly.
pub fn fast_config() -> Config {
    Config {
        handshake_timeout_ms: 200,
        handshake_attempts: 5,
        accept_timeout_ms: Some(5_000),
        retransmit_timeout_ms: 100,
        connection_timeout_ms: 3_000,
        ..Default::default()
    }
}

/// Accepts on `port` in a background thread while connecting to it. Returns the server side
/// first.
pub fn connect_pair(
    port: u16,
    server_config: Config,
    client_config: Config,
) -> (Connection, Connection) {
    let socket = net::UdpSocket::bind(("127.0.0.1", port)).unwrap();

    let server = thread::spawn(move || {
        let (connection, _) = minquic::accept_one_with_config(&socket, server_config)
            .unwrap()
            .expect("no client connected");
        connection
    });

    let client = minquic::connect_with_config(("127.0.0.1", port), client_config).unwrap();
    let server = server.join().unwrap();

    assert_eq!(server.peer_addr().port(), client.local_addr().port());
    assert_eq!(client.peer_addr().port(), port);

    (server, client)
}

/// Receives `count` messages, failing if any takes longer than `timeout_ms`.
pub fn recv_all(connection: &Connection, count: usize, timeout_ms: u64) -> Vec<(u32, Vec<u8>)> {
    (0..count)
        .map(|i| {
            connection
                .recv_timeout(std::time::Duration::from_millis(timeout_ms))
                .unwrap()
                .unwrap_or_else(|| panic!("message {} did not arrive", i))
        })
        .collect()
}
