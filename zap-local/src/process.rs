//! Child process execution and exit-code classification.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::process::Command;

use serde::Serialize;

/// What to execute: a plain argument vector, or a string handed to `sh -c`
/// when several tool invocations must run inside one subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Argv(Vec<String>),
    Shell(String),
}

impl Invocation {
    pub fn argv(&self) -> Vec<String> {
        match self {
            Invocation::Argv(args) => args.clone(),
            Invocation::Shell(script) => vec!["sh".to_string(), "-c".to_string(), script.clone()],
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Argv(args) => write!(f, "{}", args.join(" ")),
            Invocation::Shell(script) => write!(f, "sh -c {script}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    pub fn stderr_contains(&self, marker: &str) -> bool {
        String::from_utf8_lossy(&self.stderr).contains(marker)
    }
}

pub trait ProcessRunner {
    /// Runs `invocation` to completion. `env_overrides` are applied on top of
    /// the inherited environment. A non-zero exit status is not an error.
    fn run(
        &self,
        invocation: &Invocation,
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner {
    /// Sends the stdout of uncaptured children to our stderr.
    pub stdout_to_stderr: bool,
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        env_overrides: &BTreeMap<String, String>,
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error> {
        let argv = invocation.argv();
        let (program, args) = argv.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in env_overrides {
            cmd.env(key, value);
        }
        if capture_output {
            let output = cmd.output()?;
            let status_code =
                output
                    .status
                    .code()
                    .unwrap_or(if output.status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            if self.stdout_to_stderr {
                cmd.stdout(io::stderr());
            }
            let status = cmd.status()?;
            let status_code = status
                .code()
                .unwrap_or(if status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }
}

/// Outcome of the main scan, following ZAP's automation framework exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "code", rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    SuccessWithWarnings,
    Failure(i32),
}

impl ScanOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, ScanOutcome::Failure(_))
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Success => f.write_str("success"),
            ScanOutcome::SuccessWithWarnings => f.write_str("success with warnings"),
            ScanOutcome::Failure(code) => write!(f, "failure (exit code {code})"),
        }
    }
}

pub fn classify_exit_code(code: i32) -> ScanOutcome {
    match code {
        0 => ScanOutcome::Success,
        2 => ScanOutcome::SuccessWithWarnings,
        other => ScanOutcome::Failure(other),
    }
}
