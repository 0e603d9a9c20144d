//! Mock query server binary for integration testing
//!
//! Listens on TCP and answers each newline-terminated query with one JSON
//! line. It only checks that the query is a brace-balanced selection; it
//! resolves nothing.

use clap::Parser;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mock_query_server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:50051")]
    addr: String,

    /// Delay before binding, to simulate a slow start
    #[arg(long, default_value_t = 0)]
    startup_delay_ms: u64,

    /// Write our pid to this file at startup
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Exit with this code after the startup delay instead of serving
    #[arg(long)]
    exit_code: Option<i32>,
}

fn main() {
    let args = Args::parse();

    if let Some(path) = &args.pid_file {
        if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
            eprintln!("mock server: cannot write pid file: {}", e);
            std::process::exit(1);
        }
    }

    std::thread::sleep(Duration::from_millis(args.startup_delay_ms));

    if let Some(code) = args.exit_code {
        eprintln!("mock server: exiting with {}", code);
        std::process::exit(code);
    }

    let listener = match TcpListener::bind(&args.addr) {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock server: cannot bind {}: {}", args.addr, e);
            std::process::exit(1);
        }
    };
    eprintln!("mock server: listening on {}", args.addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                std::thread::spawn(move || handle(stream));
            }
            Err(e) => eprintln!("mock server: accept failed: {}", e),
        }
    }
}

fn handle(stream: TcpStream) {
    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    // Readiness probes connect and hang up without sending anything
    if reader.read_line(&mut line).unwrap_or(0) == 0 {
        return;
    }

    let response = answer(line.trim());
    let mut writer = &stream;
    let _ = writeln!(writer, "{}", response);
    let _ = writer.flush();
}

fn answer(query: &str) -> Value {
    if query.starts_with('{') && balanced(query) {
        json!({
            "data": {
                "query": query,
                "selections": query.split_whitespace().filter(|t| !t.contains(['{', '}'])).count()
            }
        })
    } else {
        json!({
            "errors": [{ "message": format!("syntax error in query: {}", query) }]
        })
    }
}

fn balanced(query: &str) -> bool {
    let mut depth = 0i32;
    for c in query.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}
