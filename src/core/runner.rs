//! External process execution.
//!
//! Every command the provisioner issues (apt-get, curl, docker, ufw, restic,
//! systemctl) goes through [`CommandRunner`], so the orchestration logic can
//! be exercised against a scripted host in tests.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// A command to run: program, arguments, and extra environment.
///
/// Environment values may carry secrets; they are never printed.
#[derive(Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, Zeroizing<String>)>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env
            .push((key.to_string(), Zeroizing::new(value.to_string())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Keys of the extra environment, values withheld.
    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }

    /// Program and arguments joined by spaces, for logs and matching.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.command_line())
            .field("env", &self.env_keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Combined output, trimmed, for error messages.
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        out.push_str(self.stdout.trim());
        if !self.stderr.trim().is_empty() {
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str(self.stderr.trim());
        }
        out
    }
}

pub trait CommandRunner {
    /// Run to completion. `Err` only when the process could not be spawned.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run and fail unless the exit status is zero.
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.run(invocation)?;
        if output.success() {
            return Ok(output);
        }
        bail!(
            "`{}` exited with {}: {}",
            invocation.command_line(),
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            output.diagnostics()
        );
    }

    /// Whether the command exits zero; spawn failures count as `false`.
    fn succeeds(&self, invocation: &Invocation) -> bool {
        self.run(invocation).map(|o| o.success()).unwrap_or(false)
    }
}

/// Runs commands on the local host, blocking until each exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation.command_line(), "exec");
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &invocation.env {
            cmd.env(key, value.as_str());
        }
        let output = cmd
            .output()
            .with_context(|| format!("run {}", invocation.program))?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(command = %invocation.command_line(), code = ?result.code, "exit");
        Ok(result)
    }
}

/// Whether `program` can be found and started.
pub fn is_available(runner: &dyn CommandRunner, program: &str) -> bool {
    runner.run(&Invocation::new(program).arg("--version")).is_ok()
}


#[cfg(test)]
mod tests {
    use super::fake::FakeRunner;
    use super::*;

    #[test]
    fn test_debug_hides_env_values() {
        let inv = Invocation::new("restic")
            .args(["-r", "/repo", "snapshots"])
            .env("RESTIC_PASSWORD", "hunter2");
        let debug = format!("{:?}", inv);
        assert!(debug.contains("RESTIC_PASSWORD"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(inv.command_line(), "restic -r /repo snapshots");
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let runner = FakeRunner::new();
        runner.fail("apt-get update");
        let err = runner
            .run_checked(&Invocation::new("apt-get").arg("update"))
            .unwrap_err();
        assert!(err.to_string().contains("apt-get update"));
        assert!(err.to_string().contains("simulated failure"));
    }

    #[test]
    fn test_fake_sequence_repeats_last() {
        let runner = FakeRunner::new();
        runner.respond(
            "docker info",
            vec![CommandOutput::failed(1, "down"), CommandOutput::ok("up")],
        );
        let inv = Invocation::new("docker").arg("info");
        assert!(!runner.succeeds(&inv));
        assert!(runner.succeeds(&inv));
        assert!(runner.succeeds(&inv));
        assert_eq!(runner.count("docker info"), 3);
    }

    #[test]
    fn test_system_runner_spawn_failure() {
        let result = SystemRunner.run(&Invocation::new("hostforge-definitely-missing-binary"));
        assert!(result.is_err());
    }
}
