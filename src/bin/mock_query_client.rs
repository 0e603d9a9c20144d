//! Mock query client binary for integration testing
//!
//! Sends one query to the mock server, prints the JSON response and exits
//! 1 if the response carries errors, 2 if the server is unreachable.

use clap::Parser;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mock_query_client")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:50051")]
    addr: String,

    /// Append the query to this file before sending it
    #[arg(long)]
    record: Option<PathBuf>,

    /// Sleep after recording, before sending
    #[arg(long, default_value_t = 0)]
    sleep_ms: u64,

    /// The query to send
    query: String,
}

fn main() {
    let args = Args::parse();

    if let Some(path) = &args.record {
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", args.query));
        if let Err(e) = appended {
            eprintln!("mock client: cannot record query: {}", e);
            std::process::exit(1);
        }
    }

    std::thread::sleep(Duration::from_millis(args.sleep_ms));

    let mut stream = match TcpStream::connect(&args.addr) {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("mock client: cannot connect to {}: {}", args.addr, e);
            std::process::exit(2);
        }
    };

    if let Err(e) = writeln!(stream, "{}", args.query) {
        eprintln!("mock client: send failed: {}", e);
        std::process::exit(2);
    }

    let mut line = String::new();
    if let Err(e) = BufReader::new(&stream).read_line(&mut line) {
        eprintln!("mock client: receive failed: {}", e);
        std::process::exit(2);
    }
    println!("{}", line.trim_end());

    let response: Value = serde_json::from_str(&line).unwrap_or(Value::Null);
    if let Some(errors) = response.get("errors") {
        eprintln!("mock client: query failed: {}", errors);
        std::process::exit(1);
    }
    if response.get("data").is_none() {
        eprintln!("mock client: malformed response");
        std::process::exit(1);
    }
}
