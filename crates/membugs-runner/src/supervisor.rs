//! Disposable workers: one child process per fault execution.
//!
//! The supervisor re-invokes a `membugs` binary as
//! `membugs worker --fault <name> [--direction <dir>] [--control] [--multi-shot]`.
//! A worker that survives prints its [`ExecutionResult`] as one JSON line on
//! stdout.  A worker that does not survive leaves only an exit status and
//! whatever the sanitizer wrote to stderr.
//!
//! | Worker ended with                       | Recorded outcome                  |
//! |-----------------------------------------|-----------------------------------|
//! | JSON result, no sanitizer banner        | the worker's outcome              |
//! | JSON result + banner, was `undetected`  | `detected` (reported after return)|
//! | no result + sanitizer banner            | `detected`                        |
//! | no result, killed by a signal           | `crashed`                         |
//! | no result, any other exit               | `crashed`                         |

use log::{debug, info, warn};
use membugs_fault::catalog::{AccessKind, Direction, FaultCatalog, FaultCategory, FaultSpec};
use membugs_fault::config::{HarnessConfig, ENV_DISABLE, ENV_REPEAT};
use membugs_fault::executor::{ExecutionRequest, Target};
use membugs_fault::report::{ExecutionResult, Outcome, ResultReporter};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use thiserror::Error;

/// Lines a sanitizer runtime prints when it reports a violation.
const SANITIZER_BANNERS: &[&str] = &[
    "ERROR: AddressSanitizer",
    "ERROR: HWAddressSanitizer",
    "ERROR: LeakSanitizer",
    "WARNING: MemorySanitizer",
];

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn worker {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot locate the membugs binary: {0}")]
    CurrentExe(std::io::Error),

    #[error("fault {0} is disabled")]
    Disabled(FaultCategory),
}

/// How a worker process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl WorkerExit {
    pub fn from_output(output: &Output) -> Self {
        Self {
            code: output.status.code(),
            signal: exit_signal(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// The last stdout line that parses as a result.
    pub fn result(&self) -> Option<ExecutionResult> {
        self.stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }

    /// The first sanitizer banner on stderr, if any.
    pub fn sanitizer_banner(&self) -> Option<&'static str> {
        SANITIZER_BANNERS
            .iter()
            .copied()
            .find(|banner| self.stderr.contains(banner))
    }

    fn describe(&self) -> String {
        match (self.signal, self.code) {
            (Some(sig), _) => format!("killed by {}", signal_name(sig)),
            (None, Some(code)) => format!("exit code {code}"),
            (None, None) => "terminated".to_string(),
        }
    }
}

/// Turn a finished worker into a result for `spec`.
pub fn classify(
    spec: &FaultSpec,
    direction: Direction,
    access: AccessKind,
    exit: &WorkerExit,
) -> ExecutionResult {
    let banner = exit.sanitizer_banner();
    match exit.result() {
        Some(mut result) => {
            if let Some(banner) = banner {
                if result.outcome == Outcome::Undetected {
                    result.outcome = Outcome::Detected;
                }
                if result.detail.is_none() {
                    result.detail = Some(format!("{banner} after return ({})", exit.describe()));
                }
            }
            result
        }
        None => {
            let outcome = if banner.is_some() {
                Outcome::Detected
            } else {
                Outcome::Crashed
            };
            let detail = match banner {
                Some(banner) => format!("{banner} ({})", exit.describe()),
                None if exit.code == Some(0) => "worker exited without a result".to_string(),
                None => exit.describe(),
            };
            ExecutionResult::new(spec.id, spec.category, direction, access, outcome).with_detail(detail)
        }
    }
}

/// Runs faults in child processes and keeps their results.
#[derive(Debug)]
pub struct Supervisor {
    program: PathBuf,
    config: HarnessConfig,
    catalog: FaultCatalog,
    reporter: ResultReporter,
}

impl Supervisor {
    /// Use `program` as the worker binary.
    pub fn new(program: impl Into<PathBuf>, config: HarnessConfig) -> Self {
        let catalog = FaultCatalog::standard(|category| config.is_enabled(category));
        Self {
            program: program.into(),
            config,
            catalog,
            reporter: ResultReporter::new(),
        }
    }

    /// Use the running executable as the worker binary.
    pub fn current_exe(config: HarnessConfig) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(SupervisorError::CurrentExe)?;
        Ok(Self::new(program, config))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn catalog(&self) -> &FaultCatalog {
        &self.catalog
    }

    /// Results of every worker run so far, crashes included.
    pub fn reporter(&self) -> &ResultReporter {
        &self.reporter
    }

    /// Execute `request`, one worker per execution.
    pub fn run_request(&self, request: &ExecutionRequest) -> Result<Vec<ExecutionResult>, SupervisorError> {
        let specs: Vec<&FaultSpec> = match request.target {
            Target::All => self.catalog.enabled().collect(),
            Target::One(category) => match self.catalog.by_category(category) {
                Some(spec) if spec.enabled => vec![spec],
                _ => return Err(SupervisorError::Disabled(category)),
            },
        };

        let mut results = Vec::new();
        for spec in specs {
            for _ in 0..request.times() {
                let result = self.execute(spec, request)?;
                results.push(self.reporter.append(result));
            }
        }
        Ok(results)
    }

    /// Run `spec` once in a fresh worker.  The result is not yet sequenced.
    pub fn execute(
        &self,
        spec: &FaultSpec,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, SupervisorError> {
        let direction = spec.category.resolve_direction(request.direction);
        let mut cmd = Command::new(&self.program);
        cmd.arg("worker")
            .arg("--fault")
            .arg(spec.category.as_str())
            .arg("--direction")
            .arg(direction.to_string())
            .env_remove(ENV_DISABLE)
            .env_remove(ENV_REPEAT)
            .stdin(Stdio::null());
        if request.access == AccessKind::Control {
            cmd.arg("--control");
        }
        if self.config.multi_shot {
            cmd.arg("--multi-shot");
        }

        debug!("spawning worker: {cmd:?}");
        let output = cmd.output().map_err(|source| SupervisorError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let exit = WorkerExit::from_output(&output);
        let result = classify(spec, direction, request.access, &exit);

        if result.outcome == Outcome::Crashed {
            warn!(
                "fault={} worker died without a result: {}",
                spec.category,
                result.detail.as_deref().unwrap_or("")
            );
        }
        info!(
            "fault={} direction={} access={} outcome={} (isolated)",
            spec.category, direction, request.access, result.outcome
        );
        Ok(result)
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Conventional name of `signal`.
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGBUS => "SIGBUS",
        libc::SIGABRT => "SIGABRT",
        libc::SIGILL => "SIGILL",
        libc::SIGFPE => "SIGFPE",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGKILL => "SIGKILL",
        _ => return format!("signal {signal}"),
    };
    name.to_string()
}
