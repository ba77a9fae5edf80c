#[allow(dead_code)]
mod common;

use common::util;

fn lossy_config(seed: u64) -> minquic::Config {
    minquic::Config {
        retransmit_timeout_ms: 50,
        connection_timeout_ms: 10_000,
        link: minquic::LinkConfig {
            loss_rate: 0.1,
            duplicate_rate: 0.05,
            seed: Some(seed),
        },
        ..util::fast_config()
    }
}

#[test]
fn recovers_from_loss_and_duplication() {
    let (server, client) = util::connect_pair(31100, lossy_config(1), lossy_config(2));

    let messages: Vec<Vec<u8>> = (0..20)
        .map(|i| util::random_bytes(1 + i * 3_001))
        .collect();

    for (i, data) in messages.iter().enumerate() {
        client.send(i as u32 % 3, data).unwrap();
    }

    let mut received = util::recv_all(&server, messages.len(), 20_000);

    // Streams are independent, so compare per stream
    received.sort_by_key(|(stream_id, _)| *stream_id);

    let mut expected: Vec<(u32, Vec<u8>)> = messages
        .into_iter()
        .enumerate()
        .map(|(i, data)| (i as u32 % 3, data))
        .collect();
    expected.sort_by_key(|(stream_id, _)| *stream_id);

    assert_eq!(received.len(), expected.len());
    for ((got_id, got), (want_id, want)) in received.iter().zip(expected.iter()) {
        assert_eq!(got_id, want_id);
        assert_eq!(util::digest(got), util::digest(want));
    }

    assert_eq!(server.try_recv().unwrap(), None);

    let stats = client.stats();
    assert!(stats.packets_resent > 0);
    assert!(stats.cwnd >= 1);
}

#[test]
fn total_loss_is_unreachable() {
    let client_config = minquic::Config {
        retransmit_timeout_ms: 50,
        connection_timeout_ms: 500,
        link: minquic::LinkConfig {
            loss_rate: 1.0,
            duplicate_rate: 0.0,
            seed: Some(3),
        },
        ..util::fast_config()
    };

    let (_server, client) = util::connect_pair(31101, util::fast_config(), client_config);

    client.send(1, b"into the void").unwrap();

    let result = client.recv_timeout(std::time::Duration::from_secs(5));
    assert!(matches!(result, Err(minquic::Error::PeerUnreachable)));

    assert!(matches!(
        client.send(1, b"again"),
        Err(minquic::Error::PeerUnreachable)
    ));
}
