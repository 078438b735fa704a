//! Remote-execution capability
//!
//! One trait covers both execution targets: `LocalExecutor` runs commands
//! in a local shell, `SshExecutor` tunnels them over `ssh` and copies
//! files with `scp`. A non-zero exit is always an error carrying the
//! captured output; callers decide whether that is fatal or a per-unit
//! failure.

use crate::error::{VentError, VentResult};
use std::path::Path;
use std::process::{Command, Stdio};

/// Captured result of a successful command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub code: i32,
}

/// Opaque execution target (local shell or remote over SSH)
pub trait Executor: Send + Sync {
    /// Run a shell command on the target
    fn execute(&self, command: &str) -> VentResult<CommandOutput>;

    /// Copy a local file to a path on the target
    fn copy_to(&self, local: &Path, remote: &Path) -> VentResult<()>;

    /// Human-readable target description for error messages
    fn describe(&self) -> String;
}

fn collect(server: &str, output: std::process::Output) -> VentResult<CommandOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    if !output.status.success() {
        let mut message = stderr.trim().to_string();
        if message.is_empty() {
            message = stdout.trim().to_string();
        }
        return Err(VentError::Remote {
            server: server.to_string(),
            code,
            output: message,
        });
    }
    Ok(CommandOutput { stdout, code })
}

/// Quote a path for safe use in shell commands
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Executes commands on this machine through `sh -c`
pub struct LocalExecutor {
    name: String,
}

impl LocalExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Executor for LocalExecutor {
    fn execute(&self, command: &str) -> VentResult<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()?;
        collect(&self.name, output)
    }

    fn copy_to(&self, local: &Path, remote: &Path) -> VentResult<()> {
        if let Some(parent) = remote.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local, remote)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} (local)", self.name)
    }
}

/// Executes commands on a remote host via `ssh`, copies via `scp`
pub struct SshExecutor {
    name: String,
    /// SSH destination (user@host or host)
    destination: String,
}

impl SshExecutor {
    pub fn new(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
        }
    }
}

impl Executor for SshExecutor {
    fn execute(&self, command: &str) -> VentResult<CommandOutput> {
        let output = Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(&self.destination)
            .arg(command)
            .stdin(Stdio::null())
            .output()?;
        collect(&self.name, output)
    }

    fn copy_to(&self, local: &Path, remote: &Path) -> VentResult<()> {
        let output = Command::new("scp")
            .arg("-q")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(local)
            .arg(format!("{}:{}", self.destination, remote.display()))
            .stdin(Stdio::null())
            .output()?;
        collect(&self.name, output).map(|_| ())
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.destination)
    }
}
