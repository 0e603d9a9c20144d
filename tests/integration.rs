//! End-to-end integration tests for the smoke CLI
//!
//! These tests drive the real `smoke` binary against the mock query
//! server and client binaries:
//! 1. Writing a plan that points at the mock binaries
//! 2. Running `smoke run` in an isolated temp directory
//! 3. Checking exit codes, output, query order and that the server is gone

#![cfg(unix)]

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const QUERIES: [&str; 4] = [
    "{ users { id name email } }",
    "{ users { id name posts { id title } } }",
    "{ users { name posts { title comments { id body } } } }",
    "{ users { name posts { title likes { id userId } comments { body likes { id } } } } }",
];

/// Test context with an isolated working and config directory
struct TestContext {
    /// Temporary directory for this test, also the project root
    temp_dir: tempfile::TempDir,
    /// Config directory (XDG_CONFIG_HOME)
    config_dir: PathBuf,
    /// Address the mock server listens on
    addr: String,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            config_dir,
            addr: format!("127.0.0.1:{}", find_available_port()),
        }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a plan for the mock binaries; `tweak` edits the YAML first
    fn write_plan(&self, tweak: impl FnOnce(String) -> String) -> PathBuf {
        let mut queries = String::new();
        for (i, query) in QUERIES.iter().enumerate() {
            queries.push_str(&format!("  - name: q{}\n    query: \"{}\"\n", i + 1, query));
        }

        let yaml = format!(
            r#"name: mock smoke
root: .
build:
  skip: true
server:
  target: {{ program: "{server}" }}
  args: ["--addr", "{addr}", "--pid-file", "server.pid"]
  readiness:
    probe: {{ tcp: "{addr}" }}
    ceiling_secs: 10
    on_timeout: fail
client:
  target: {{ program: "{client}" }}
  args: ["--addr", "{addr}", "--record", "queries.log"]
  timeout_secs: 30
queries:
{queries}"#,
            server = env!("CARGO_BIN_EXE_mock_query_server"),
            client = env!("CARGO_BIN_EXE_mock_query_client"),
            addr = self.addr,
            queries = queries,
        );

        let path = self.root().join("plan.yaml");
        fs::write(&path, tweak(yaml)).expect("Failed to write plan");
        path
    }

    /// Build a `smoke` command isolated from the user's config
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_smoke"));
        cmd.args(args)
            .current_dir(self.root())
            .env("XDG_CONFIG_HOME", &self.config_dir)
            .env("HOME", self.root())
            .env("NO_COLOR", "1")
            .env_remove("SMOKE_CONFIG")
            .env_remove("CARGO_TARGET_DIR");
        cmd
    }

    fn run_smoke(&self, args: &[&str]) -> SmokeOutput {
        let output = self.command(args).output().expect("Failed to run smoke");
        SmokeOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code(),
        }
    }

    fn server_pid(&self) -> Option<i32> {
        fs::read_to_string(self.root().join("server.pid"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn recorded_queries(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("queries.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Output from a smoke command
#[derive(Debug)]
struct SmokeOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl SmokeOutput {
    fn passed_banners(&self) -> usize {
        self.stdout.matches("All tests passed!").count()
    }
}

fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port");
    listener.local_addr().expect("No local address").port()
}

/// True if `pid` names a running (non-zombie) process
fn pid_alive(pid: i32) -> bool {
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => !Path::new("/proc/self").exists(),
    }
}

/// The server is reaped asynchronously; give it a moment
fn wait_until_dead(pid: i32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

// ============== Tests ==============

#[test]
fn test_all_queries_pass() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| yaml);

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap(), "--report", "report.json"]);

    assert_eq!(
        output.code,
        Some(0),
        "stdout: {}\nstderr: {}",
        output.stdout,
        output.stderr
    );
    assert_eq!(output.passed_banners(), 1);
    assert_eq!(ctx.recorded_queries(), QUERIES);

    let pid = ctx.server_pid().expect("server never started");
    assert!(wait_until_dead(pid), "server {} still running", pid);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ctx.root().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["passed"], true);
    assert_eq!(report["exit_code"], 0);
    assert_eq!(report["server_terminated"], true);
    let queries: Vec<_> = report["steps"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["kind"] == "query")
        .collect();
    assert_eq!(queries.len(), 4);
}

#[test]
fn test_build_failure_starts_nothing() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| {
        yaml.replace(
            "build:\n  skip: true\n",
            "build:\n  program: /bin/sh\n  args: [\"-c\", \"exit 101\"]\n",
        )
    });

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap()]);

    assert_eq!(output.code, Some(101));
    assert_eq!(output.passed_banners(), 0);
    assert!(ctx.server_pid().is_none(), "server was launched after a failed build");
    assert!(ctx.recorded_queries().is_empty());
}

#[test]
fn test_failed_query_stops_server() {
    let ctx = TestContext::new();
    // An unbalanced selection makes the mock server answer with errors
    let plan = ctx.write_plan(|yaml| yaml.replace(QUERIES[2], "{ users { name posts {"));

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap()]);

    assert_eq!(output.code, Some(1), "stdout: {}", output.stdout);
    assert_eq!(output.passed_banners(), 0);
    assert_eq!(ctx.recorded_queries().len(), 3);
    assert!(output.stdout.contains("Stopping server"));

    let pid = ctx.server_pid().expect("server never started");
    assert!(wait_until_dead(pid), "server {} survived a failed query", pid);
}

#[test]
fn test_slow_server_is_awaited() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| {
        yaml.replace("\"--pid-file\"", "\"--startup-delay-ms\", \"800\", \"--pid-file\"")
    });

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap(), "--quiet"]);

    assert_eq!(output.code, Some(0), "stdout: {}", output.stdout);
    assert_eq!(ctx.recorded_queries(), QUERIES);
    assert!(output.stdout.contains("Server ready after"));
}

#[test]
fn test_server_exiting_before_ready_is_reported() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| {
        yaml.replace("\"--pid-file\"", "\"--exit-code\", \"3\", \"--pid-file\"")
    });

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap()]);

    assert_eq!(output.code, Some(1));
    assert!(output.stderr.contains("exited"), "stderr: {}", output.stderr);
    assert!(ctx.recorded_queries().is_empty());
}

/// Send `signal` to smoke while the third query is in flight and return
/// its exit code
fn interrupt_third_query(ctx: &TestContext, signal: libc::c_int) -> Option<i32> {
    let third = format!("  - name: q3\n    query: \"{}\"\n", QUERIES[2]);
    let plan = ctx.write_plan(|yaml| {
        yaml.replace(
            &third,
            &format!("{}    args: [\"--sleep-ms\", \"30000\"]\n", third),
        )
    });

    let mut child = ctx
        .command(&["run", plan.to_str().unwrap(), "--quiet"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn smoke");

    // Wait for the third query to be in flight
    let deadline = Instant::now() + Duration::from_secs(30);
    while ctx.recorded_queries().len() < 3 {
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("third query never started");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    unsafe {
        libc::kill(child.id() as i32, signal);
    }

    let deadline = Instant::now() + Duration::from_secs(15);
    let status = loop {
        if let Some(status) = child.try_wait().expect("wait failed") {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("smoke did not exit after signal {}", signal);
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    status.code()
}

#[test]
fn test_sigint_during_query_stops_server() {
    let ctx = TestContext::new();

    assert_eq!(interrupt_third_query(&ctx, libc::SIGINT), Some(130));
    assert_eq!(ctx.recorded_queries().len(), 3);
    let pid = ctx.server_pid().expect("server never started");
    assert!(wait_until_dead(pid), "server {} survived SIGINT", pid);
}

#[test]
fn test_sigterm_during_query_stops_server() {
    let ctx = TestContext::new();

    assert_eq!(interrupt_third_query(&ctx, libc::SIGTERM), Some(143));
    assert_eq!(ctx.recorded_queries().len(), 3);
    let pid = ctx.server_pid().expect("server never started");
    assert!(wait_until_dead(pid), "server {} survived SIGTERM", pid);
}

#[test]
fn test_skip_build_flag_overrides_plan() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| {
        yaml.replace(
            "build:\n  skip: true\n",
            "build:\n  program: /bin/sh\n  args: [\"-c\", \"exit 101\"]\n",
        )
    });

    let output = ctx.run_smoke(&["run", plan.to_str().unwrap(), "--skip-build", "--quiet"]);

    assert_eq!(output.code, Some(0), "stdout: {}", output.stdout);
    assert_eq!(output.passed_banners(), 1);
    assert_eq!(ctx.recorded_queries(), QUERIES);
}

#[test]
fn test_builtin_plan_reaches_launch() {
    let ctx = TestContext::new();

    // No grpc_server artifact exists here, so the run stops at launch
    let output = ctx.run_smoke(&["run", "--skip-build", "--root", "."]);

    assert_eq!(output.code, Some(1), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Starting server"));
    assert!(output.stderr.contains("grpc_server"), "stderr: {}", output.stderr);
}

#[test]
fn test_report_write_failure_keeps_run_exit_code() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| {
        yaml.replace(
            "build:\n  skip: true\n",
            "build:\n  program: /bin/sh\n  args: [\"-c\", \"exit 101\"]\n",
        )
    });

    let output = ctx.run_smoke(&[
        "run",
        plan.to_str().unwrap(),
        "--report",
        "missing-dir/report.json",
    ]);

    assert_eq!(output.code, Some(101));
    assert!(output.stderr.contains("Build failed"), "stderr: {}", output.stderr);
    assert!(output.stderr.contains("report"), "stderr: {}", output.stderr);
    assert!(!ctx.root().join("missing-dir").exists());
}

#[test]
fn test_config_file_is_honored() {
    let ctx = TestContext::new();
    let plan = ctx.write_plan(|yaml| yaml);
    let config = ctx.root().join("custom.toml");
    fs::write(&config, "[timeouts]\nshutdown_grace_ms = 250\n").unwrap();

    let output = ctx
        .command(&["run", plan.to_str().unwrap(), "--quiet"])
        .env("SMOKE_CONFIG", &config)
        .output()
        .expect("Failed to run smoke");
    assert_eq!(output.status.code(), Some(0));

    fs::write(&config, "[timeouts\n").unwrap();
    let output = ctx
        .command(&["run", plan.to_str().unwrap()])
        .env("SMOKE_CONFIG", &config)
        .output()
        .expect("Failed to run smoke");
    assert_eq!(output.status.code(), Some(2));
    // A bad config file must not start another run
    assert_eq!(ctx.recorded_queries().len(), 4);
}

#[test]
fn test_validate_and_show_plan() {
    let ctx = TestContext::new();

    let output = ctx.run_smoke(&["show-plan"]);
    assert_eq!(output.code, Some(0));
    assert!(output.stdout.contains("grpc_server"));
    assert!(output.stdout.contains("grpc_client"));

    let plan = ctx.write_plan(|yaml| yaml);
    let output = ctx.run_smoke(&["validate", plan.to_str().unwrap()]);
    assert_eq!(output.code, Some(0), "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Plan is valid"));
    assert!(output.stdout.contains("queries: 4"));

    let broken = ctx.write_plan(|yaml| yaml.replace("queries:\n", "queries: []\nunused:\n"));
    let output = ctx.run_smoke(&["validate", broken.to_str().unwrap()]);
    assert_eq!(output.code, Some(2), "stdout: {}", output.stdout);
}
