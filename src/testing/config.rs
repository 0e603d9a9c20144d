//! Test plan configuration types
//!
//! Defines the data structures for deserializing YAML smoke test plans.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

/// Plan reproducing the gRPC example smoke test
const BUILTIN_PLAN: &str = include_str!("../../plans/grpc_smoke.yaml");

/// A complete smoke test plan loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct TestPlan {
    /// Name of the plan
    pub name: String,
    /// Optional description of what the plan verifies
    #[serde(default)]
    pub description: Option<String>,
    /// Project root, relative to the plan file
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// How the targets are compiled
    #[serde(default)]
    pub build: BuildConfig,
    /// The background process
    pub server: ServerConfig,
    /// The executable invoked once per query
    pub client: ClientConfig,
    /// Queries to run, in order
    pub queries: Vec<QueryStep>,
}

/// Build settings
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BuildConfig {
    /// Build program (default from config, normally `cargo`)
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments used verbatim instead of the composed `build` invocation
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub profile: Profile,
    /// Cargo features to enable
    #[serde(default)]
    pub features: Vec<String>,
    /// Skip the build step entirely
    #[serde(default)]
    pub skip: bool,
}

/// Cargo build profile
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Debug,
    Release,
}

impl Profile {
    /// Directory name under the cargo target directory
    pub fn dir_name(self) -> &'static str {
        match self {
            Profile::Debug => "debug",
            Profile::Release => "release",
        }
    }
}

/// An executable the runner builds and/or runs
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A cargo example (`--example <name>`)
    Example(String),
    /// A cargo binary (`--bin <name>`)
    Bin(String),
    /// A prebuilt program, relative to the project root or on PATH
    Program(PathBuf),
}

impl Target {
    /// Short display name
    pub fn name(&self) -> String {
        match self {
            Target::Example(name) | Target::Bin(name) => name.clone(),
            Target::Program(path) => path.display().to_string(),
        }
    }

    /// Whether the build step compiles this target
    pub fn is_cargo_target(&self) -> bool {
        !matches!(self, Target::Program(_))
    }
}

/// Configuration for the background server
#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub target: Target,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Discard the server's stdout/stderr instead of inheriting them
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

/// How the runner decides the server is ready
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ReadinessConfig {
    /// Health check to poll; without one the runner waits the full ceiling
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
    /// Maximum wait in seconds (default from config)
    #[serde(default)]
    pub ceiling_secs: Option<u64>,
    #[serde(default)]
    pub initial_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
    #[serde(default)]
    pub on_timeout: OnTimeout,
}

/// Health check polled while the server starts
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeConfig {
    /// Ready once a TCP connection to `host:port` succeeds
    Tcp(String),
    /// Ready once this command exits 0
    Command(Vec<String>),
}

/// What happens when the readiness ceiling elapses without a successful probe
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnTimeout {
    /// Log a warning and start querying anyway
    #[default]
    Proceed,
    /// Abort the run
    Fail,
}

/// Configuration for the client
#[derive(Deserialize, Debug, Clone)]
pub struct ClientConfig {
    pub target: Target,
    /// Arguments placed before every query
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Per-invocation timeout in seconds (default from config)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A single client invocation
#[derive(Deserialize, Debug, Clone)]
pub struct QueryStep {
    #[serde(default)]
    pub name: Option<String>,
    /// Passed to the client as its last argument
    pub query: String,
    /// Extra arguments placed between the client args and the query
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub expect: Option<QueryExpectation>,
}

impl QueryStep {
    /// Display name; falls back to the 1-based position
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("query {}", index + 1))
    }
}

/// Expectations for a query invocation
#[derive(Deserialize, Debug, Clone)]
pub struct QueryExpectation {
    /// Whether the client should exit 0 (default: true)
    #[serde(default)]
    pub success: Option<bool>,
    /// Substring that should appear in stdout
    #[serde(default)]
    pub output_contains: Option<String>,
}

impl TestPlan {
    /// The plan for the gRPC example server and client
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_PLAN)
    }

    /// Raw YAML of the built-in plan
    pub fn builtin_yaml() -> &'static str {
        BUILTIN_PLAN
    }

    /// Parse and validate a plan from YAML text
    ///
    /// Enum values such as targets and probes are written as single-key
    /// maps (`{ example: grpc_server }`) rather than YAML tags.
    pub fn parse(content: &str) -> Result<Self> {
        let plan: TestPlan = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(content),
        )?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Cargo targets the build step compiles, deduplicated, server first
    pub fn cargo_targets(&self) -> Vec<&Target> {
        let mut targets = Vec::new();
        for target in [&self.server.target, &self.client.target] {
            if target.is_cargo_target() && !targets.contains(&target) {
                targets.push(target);
            }
        }
        targets
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("plan name must not be empty".to_string()));
        }
        if self.queries.is_empty() {
            return Err(Error::Config("plan must contain at least one query".to_string()));
        }

        validate_target("server", &self.server.target)?;
        validate_target("client", &self.client.target)?;

        let readiness = &self.server.readiness;
        if readiness.ceiling_secs == Some(0) {
            return Err(Error::Config("readiness ceiling_secs must be positive".to_string()));
        }
        if readiness.initial_interval_ms == Some(0) || readiness.max_interval_ms == Some(0) {
            return Err(Error::Config(
                "readiness probe intervals must be positive".to_string(),
            ));
        }
        match &readiness.probe {
            Some(ProbeConfig::Tcp(addr)) => validate_tcp_addr(addr)?,
            Some(ProbeConfig::Command(argv)) if argv.is_empty() => {
                return Err(Error::Config("command probe needs at least a program".to_string()));
            }
            _ => {}
        }

        if self.client.timeout_secs == Some(0) {
            return Err(Error::Config("client timeout_secs must be positive".to_string()));
        }
        for (i, query) in self.queries.iter().enumerate() {
            if query.timeout_secs == Some(0) {
                return Err(Error::Config(format!(
                    "{}: timeout_secs must be positive",
                    query.display_name(i)
                )));
            }
        }

        Ok(())
    }
}

fn validate_target(role: &str, target: &Target) -> Result<()> {
    let empty = match target {
        Target::Example(name) | Target::Bin(name) => name.trim().is_empty(),
        Target::Program(path) => path.as_os_str().is_empty(),
    };
    if empty {
        return Err(Error::Config(format!("{} target name must not be empty", role)));
    }
    Ok(())
}

fn validate_tcp_addr(addr: &str) -> Result<()> {
    let valid = addr
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if !valid {
        return Err(Error::Config(format!(
            "tcp probe address '{}' must be of the form host:port",
            addr
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
server:
  target: { program: ./server }
client:
  target: { bin: client }
queries:
  - query: "{ users { id } }"
"#;

    #[test]
    fn test_builtin_plan_matches_grpc_example() {
        let plan = TestPlan::builtin().unwrap();
        assert_eq!(plan.server.target, Target::Example("grpc_server".to_string()));
        assert_eq!(plan.client.target, Target::Example("grpc_client".to_string()));
        assert_eq!(plan.queries.len(), 4);
        assert_eq!(plan.queries[0].query, "{ users { id name email } }");
        assert_eq!(
            plan.server.readiness.probe,
            Some(ProbeConfig::Tcp("127.0.0.1:50051".to_string()))
        );
        assert_eq!(plan.server.readiness.on_timeout, OnTimeout::Proceed);
    }

    #[test]
    fn test_targets_and_probes_parse_from_single_key_maps() {
        let yaml = MINIMAL
            .replace(
                "  target: { program: ./server }\n",
                "  target:\n    example: grpc_server\n  readiness:\n    probe: { tcp: \"127.0.0.1:50051\" }\n",
            );
        let plan = TestPlan::parse(&yaml).unwrap();
        assert_eq!(plan.server.target, Target::Example("grpc_server".to_string()));
        assert_eq!(plan.client.target, Target::Bin("client".to_string()));
        assert_eq!(
            plan.server.readiness.probe,
            Some(ProbeConfig::Tcp("127.0.0.1:50051".to_string()))
        );

        let plan = TestPlan::parse(MINIMAL).unwrap();
        assert_eq!(plan.server.target, Target::Program(PathBuf::from("./server")));
    }

    #[test]
    fn test_minimal_plan_defaults() {
        let plan = TestPlan::parse(MINIMAL).unwrap();
        assert_eq!(plan.build.profile, Profile::Debug);
        assert!(!plan.build.skip);
        assert!(plan.server.readiness.probe.is_none());
        assert!(plan.server.args.is_empty());
        assert_eq!(plan.queries[0].display_name(0), "query 1");
    }

    #[test]
    fn test_cargo_targets_skip_programs_and_duplicates() {
        let plan = TestPlan::parse(MINIMAL).unwrap();
        assert_eq!(plan.cargo_targets(), vec![&Target::Bin("client".to_string())]);

        let mut plan = plan;
        plan.server.target = Target::Bin("client".to_string());
        assert_eq!(plan.cargo_targets().len(), 1);
    }

    #[test]
    fn test_plan_without_queries_is_rejected() {
        let yaml = MINIMAL.replace("queries:\n  - query: \"{ users { id } }\"\n", "queries: []\n");
        let err = TestPlan::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("at least one query"));
    }

    #[test]
    fn test_zero_probe_interval_is_rejected() {
        for field in ["initial_interval_ms", "max_interval_ms"] {
            let yaml = MINIMAL.replace(
                "  target: { program: ./server }\n",
                &format!(
                    "  target: {{ program: ./server }}\n  readiness:\n    {}: 0\n",
                    field
                ),
            );
            let err = TestPlan::parse(&yaml).unwrap_err();
            assert!(err.to_string().contains("intervals must be positive"), "{}", field);
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn test_tcp_probe_address_is_validated() {
        assert!(validate_tcp_addr("localhost:50051").is_ok());
        assert!(validate_tcp_addr("[::1]:8080").is_ok());
        assert!(validate_tcp_addr("localhost").is_err());
        assert!(validate_tcp_addr(":80").is_err());
        assert!(validate_tcp_addr("host:http").is_err());
    }

    #[test]
    fn test_unknown_target_kind_is_yaml_error() {
        let yaml = MINIMAL.replace("{ bin: client }", "{ crate: client }");
        let err = TestPlan::parse(&yaml).unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_query_expectations_parse() {
        let yaml = r#"
name: expectations
server:
  target: { example: s }
  readiness:
    probe: { command: ["true"] }
    on_timeout: fail
client:
  target: { example: c }
  timeout_secs: 5
queries:
  - name: broken
    query: "{"
    expect:
      success: false
      output_contains: errors
"#;
        let plan = TestPlan::parse(yaml).unwrap();
        let expect = plan.queries[0].expect.as_ref().unwrap();
        assert_eq!(expect.success, Some(false));
        assert_eq!(expect.output_contains.as_deref(), Some("errors"));
        assert_eq!(plan.server.readiness.on_timeout, OnTimeout::Fail);
        assert_eq!(plan.client.timeout_secs, Some(5));
    }
}
