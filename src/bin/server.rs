use clap::{value_parser, Arg, Command};
use std::process::ExitCode;
use tracing::{error, info, Level};

const GREETING: &str = "SOME DATA, MAY EXCEED 1500 bytes";

fn main() -> ExitCode {
    let matches = Command::new("minquic-server")
        .about("accept one client, send it a message, and print its reply")
        .arg(
            Arg::new("address")
                .long("address")
                .default_value("0.0.0.0")
                .help("Address to listen on"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .default_value("30000")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("size")
                .long("size")
                .default_value("4000")
                .help("Size of the message sent to the client, in bytes")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .value_parser(value_parser!(Level)),
        )
        .get_matches();

    let level = *matches.get_one::<Level>("log-level").unwrap();
    tracing_subscriber::fmt().with_max_level(level).init();

    let address = matches.get_one::<String>("address").unwrap();
    let port = *matches.get_one::<u16>("port").unwrap();
    let size = *matches.get_one::<usize>("size").unwrap();

    let mut server = match minquic::Server::listen((address.as_str(), port)) {
        Ok(server) => server,
        Err(err) => {
            error!(?err, "failed to listen");
            return ExitCode::FAILURE;
        }
    };

    let peer = match server.accept() {
        Ok(Some(peer)) => peer,
        Ok(None) => {
            error!("no client completed a handshake");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!(?err, "failed to accept");
            return ExitCode::FAILURE;
        }
    };
    info!(%peer, "client connected");

    // Repeat the greeting to the requested size
    let message: Vec<u8> = GREETING.bytes().cycle().take(size.max(GREETING.len())).collect();

    if let Err(err) = server.send(1, &message) {
        error!(?err, "failed to send");
        return ExitCode::FAILURE;
    }
    info!(len = message.len(), "sent message");

    match server.recv() {
        Ok(Some((stream_id, data))) => {
            println!("{}", String::from_utf8_lossy(&data));
            info!(stream_id, len = data.len(), "received reply");
        }
        Ok(None) => info!("connection closed before a reply arrived"),
        Err(err) => {
            error!(?err, "failed to receive");
            return ExitCode::FAILURE;
        }
    }

    server.close();

    ExitCode::SUCCESS
}
