//! Logging and tracing configuration
//!
//! Progress banners go to stdout; diagnostics go through tracing to stderr
//! and, when requested, to a log file.

use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default filter directive for a verbosity level
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "smoke=info,warn",
        1 => "smoke=debug,info",
        _ => "smoke=trace,debug",
    }
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable; without it the
/// level follows `-v` flags. When `log_file` is given, a second non-ANSI layer
/// writes full details there. The returned guard must be held until exit so
/// buffered file output is flushed.
pub fn init_cli(verbosity: u8, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let (file_layer, guard) = match log_file.and_then(open_log_writer) {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Open a non-blocking appender for `path`, creating its directory
fn open_log_writer(path: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    let Some(file_name) = path.file_name() else {
        eprintln!("Warning: Log file path has no file name: {}", path.display());
        return None;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return None;
    }

    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
