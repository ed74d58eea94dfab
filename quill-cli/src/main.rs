//! Quorum status probe.
//!
//! Connects to each listed peer and prints its view of one quorum:
//!
//! ```bash
//! quill-status --quorum 7 --servers node1:9001,node2:9001,node3:9001
//! ```
//!
//! Individual peer failures are reported and do not abort the probe;
//! malformed arguments exit with code 1.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use quill_core::{PeerAddress, QuorumId};
use quill_runtime::PeerClient;
use tracing_subscriber::EnvFilter;

/// Probe the status of every peer in a quorum.
#[derive(Parser, Debug)]
#[command(name = "quill-status")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The quorum (partition) to probe.
    #[arg(short, long)]
    quorum: u64,

    /// Comma-separated list of `host:port` peers.
    #[arg(short, long)]
    servers: String,

    /// Connection/read timeout in milliseconds.
    #[arg(short, long, default_value = "5000")]
    timeout: u64,
}

fn parse_servers(list: &str) -> Result<Vec<PeerAddress>, String> {
    let mut servers = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        let valid = matches!(
            entry.split_once(':'),
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok()
        );
        if !valid {
            return Err(format!("malformed server address: {entry:?}"));
        }
        servers.push(PeerAddress::new(entry));
    }
    Ok(servers)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(1);
        }
    };

    let servers = match parse_servers(&args.servers) {
        Ok(servers) => servers,
        Err(message) => {
            eprintln!("failed to parse the command line: {message}");
            return ExitCode::from(1);
        }
    };

    let quorum = QuorumId::new(args.quorum);
    let client = PeerClient::new(Duration::from_millis(args.timeout));

    for server in servers {
        match client.peer_status(&server, quorum).await {
            Ok(status) => println!("{server}: {status}"),
            Err(err) => println!("{server}: unavailable ({err})"),
        }
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_servers() {
        let servers = parse_servers("node1:9001, node2:9002,node3:9003").unwrap();
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[1], PeerAddress::new("node2:9002"));
    }

    #[test]
    fn test_parse_servers_rejects_garbage() {
        assert!(parse_servers("").is_err());
        assert!(parse_servers("node1").is_err());
        assert!(parse_servers("node1:port").is_err());
        assert!(parse_servers("node1:9001,,node2:9002").is_err());
    }
}
