use clap::{value_parser, Arg, Command};
use std::process::ExitCode;
use tracing::{error, info, Level};

fn main() -> ExitCode {
    let matches = Command::new("minquic-client")
        .about("connect to a server, print its message, and reply")
        .arg(
            Arg::new("address")
                .long("address")
                .default_value("127.0.0.1")
                .help("Address of the server"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .default_value("30000")
                .value_parser(value_parser!(u16)),
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

    // Give the reply time to be acknowledged before shutting down
    let config = minquic::Config {
        linger_ms: 3_000,
        ..Default::default()
    };

    let mut client = minquic::Client::with_config(config);

    if let Err(err) = client.connect((address.as_str(), port)) {
        error!(?err, "failed to connect");
        return ExitCode::FAILURE;
    }
    info!("connected");

    match client.recv() {
        Ok(Some((stream_id, data))) => {
            println!("{}", String::from_utf8_lossy(&data));
            info!(stream_id, len = data.len(), "received message");
        }
        Ok(None) => {
            error!("connection closed before a message arrived");
            return ExitCode::FAILURE;
        }
        Err(err) => {
            error!(?err, "failed to receive");
            return ExitCode::FAILURE;
        }
    }

    if let Err(err) = client.send(1, b"Hello Server!") {
        error!(?err, "failed to send");
        return ExitCode::FAILURE;
    }

    client.close();

    ExitCode::SUCCESS
}
