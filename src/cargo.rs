//! Build tool integration
//!
//! Composes the build command for the plan's cargo targets and locates the
//! compiled artifacts under the target directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::paths::resolve_against;
use crate::common::{Error, Result};
use crate::testing::{Profile, Target, TestPlan};

/// A fully composed build command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    /// Compose the build command for a plan
    ///
    /// Returns `None` when there is nothing to build: the plan skips the
    /// build, or every target is a prebuilt program and no explicit args
    /// were given.
    pub fn from_plan(plan: &TestPlan, default_program: &str) -> Option<Self> {
        let build = &plan.build;
        if build.skip {
            return None;
        }

        let program = build
            .program
            .clone()
            .unwrap_or_else(|| default_program.to_string());

        if let Some(args) = &build.args {
            return Some(Self {
                program,
                args: args.clone(),
            });
        }

        let targets = plan.cargo_targets();
        if targets.is_empty() {
            return None;
        }

        let mut args = vec!["build".to_string()];
        if build.profile == Profile::Release {
            args.push("--release".to_string());
        }
        if !build.features.is_empty() {
            args.push("--features".to_string());
            args.push(build.features.join(","));
        }
        for target in targets {
            match target {
                Target::Example(name) => {
                    args.push("--example".to_string());
                    args.push(name.clone());
                }
                Target::Bin(name) => {
                    args.push("--bin".to_string());
                    args.push(name.clone());
                }
                Target::Program(_) => {}
            }
        }

        Some(Self { program, args })
    }

    /// Shell-like rendering for banners and errors
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the build to completion in `root`, streaming its output
    pub async fn run(&self, root: &Path) -> Result<()> {
        let program = resolve_program(root, &self.program).map_err(|reason| {
            Error::BuildToolUnavailable {
                program: self.program.clone(),
                reason,
            }
        })?;

        tracing::debug!(program = %program.display(), args = ?self.args, "Running build");

        let status = Command::new(&program)
            .args(&self.args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::BuildToolUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(Error::Build {
                command: self.display(),
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// Cargo's target directory for a project root
///
/// Honours `CARGO_TARGET_DIR`; a relative value is taken relative to the root.
pub fn target_dir(root: &Path) -> PathBuf {
    target_dir_from(root, std::env::var_os("CARGO_TARGET_DIR"))
}

fn target_dir_from(root: &Path, configured: Option<OsString>) -> PathBuf {
    match configured {
        Some(dir) if !dir.is_empty() => resolve_against(root, Path::new(&dir)),
        _ => root.join("target"),
    }
}

/// Where the build step leaves the executable for `target`
///
/// Fails with a human-readable reason if the executable does not exist.
pub fn locate(root: &Path, profile: Profile, target: &Target) -> std::result::Result<PathBuf, String> {
    locate_in(root, &target_dir(root), profile, target)
}

fn locate_in(
    root: &Path,
    target_dir: &Path,
    profile: Profile,
    target: &Target,
) -> std::result::Result<PathBuf, String> {
    let exe = |name: &str| format!("{}{}", name, std::env::consts::EXE_SUFFIX);
    let profile_dir = target_dir.join(profile.dir_name());

    let path = match target {
        Target::Example(name) => profile_dir.join("examples").join(exe(name)),
        Target::Bin(name) => profile_dir.join(exe(name)),
        Target::Program(path) => return resolve_program(root, &path.to_string_lossy()),
    };

    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{} not found (was it built?)", path.display()))
    }
}

/// Resolve a program name: paths are taken relative to the root, bare names
/// are searched on PATH
fn resolve_program(root: &Path, program: &str) -> std::result::Result<PathBuf, String> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = resolve_against(root, candidate);
        if path.is_file() {
            Ok(path)
        } else {
            Err(format!("{} not found", path.display()))
        }
    } else {
        which::which(program).map_err(|e| format!("{} not found on PATH: {}", program, e))
    }
}
