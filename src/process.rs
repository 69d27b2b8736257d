//! Centralized command execution with consistent error handling.
//!
//! Every external tool the pipeline drives (mount, blkid, dracut, veritysetup,
//! ukify, sbsign, grub2-mkconfig) is described as a [`Cmd`] and handed to an
//! [`Executor`]. Components receive the executor at construction, so tests can
//! substitute a recording fake without touching any global state.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Result of a command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Exit code, or None if terminated by signal.
    pub code: Option<i32>,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Something that can run a [`Cmd`].
///
/// Implementations return `Err` only when the process could not be started.
/// Exit-status policy lives in [`Cmd::run`].
pub trait Executor {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult>;
}

/// Runs commands on the build host, entering a chroot when requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExecutor;

impl Executor for HostExecutor {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let mut command = match cmd.chroot() {
            Some(root) => {
                let mut c = Command::new("chroot");
                c.arg(root).arg(cmd.program());
                c
            }
            None => Command::new(cmd.program()),
        };
        command.args(cmd.arguments());
        for (key, value) in cmd.envs() {
            command.env(key, value);
        }
        if let Some(dir) = cmd.current_dir() {
            command.current_dir(dir);
        }

        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.stdin(if cmd.input().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", cmd.program()))?;

        if let Some(input) = cmd.input() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input)
                    .with_context(|| format!("Failed to write stdin of '{}'", cmd.program()))?;
            }
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", cmd.program()))?;

        Ok(CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    chroot: Option<PathBuf>,
    envs: Vec<(String, String)>,
    input: Option<Vec<u8>>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            chroot: None,
            envs: Vec::new(),
            input: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Run the program inside `root` instead of on the host.
    pub fn in_chroot(mut self, root: &Path) -> Self {
        self.chroot = Some(root.to_path_buf());
        self
    }

    /// Override an environment variable for this command.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Feed `input` to the command's stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn chroot(&self) -> Option<&Path> {
        self.chroot.as_deref()
    }

    pub fn envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Program and arguments joined by spaces, for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the command through `exec` and capture output.
    pub fn run(mut self, exec: &dyn Executor) -> Result<CommandResult> {
        match &self.chroot {
            Some(root) => debug!(chroot = %root.display(), "exec: {}", self.command_line()),
            None => debug!("exec: {}", self.command_line()),
        }

        let result = exec.execute(&self)?;

        if !self.allow_fail && !result.success() {
            let prefix = match self.error_prefix.take() {
                Some(prefix) => prefix,
                None => format!("'{}' failed", self.command_line()),
            };

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

/// Check if a program exists in the host PATH.
///
/// Returns the full path if found, None otherwise.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Check whether `program` resolves inside `root` by asking the root's own shell.
pub fn exists_in_root(exec: &dyn Executor, root: &Path, program: &str) -> bool {
    Cmd::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", program))
        .in_chroot(root)
        .allow_fail()
        .run(exec)
        .map(|r| r.success() && !r.stdout_trimmed().is_empty())
        .unwrap_or(false)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run(&HostExecutor).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .run(&HostExecutor)
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("Custom build step failed")
            .run(&HostExecutor)
            .unwrap_err();

        assert!(err.to_string().contains("Custom build step failed"));
    }

    #[test]
    fn test_default_error_names_command_line() {
        let err = Cmd::new("sh")
            .args(["-c", "exit 3"])
            .run(&HostExecutor)
            .unwrap_err();

        assert_eq!(err.to_string(), "'sh -c exit 3' failed (exit code 3)");
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run(&HostExecutor).unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let result = Cmd::new("cat").stdin("piped input").run(&HostExecutor).unwrap();
        assert_eq!(result.stdout, "piped input");
    }

    #[test]
    fn test_env_override() {
        let result = Cmd::new("sh")
            .args(["-c", "echo $IMGBOOT_TEST_VAR"])
            .env("IMGBOOT_TEST_VAR", "scoped")
            .run(&HostExecutor)
            .unwrap();
        assert_eq!(result.stdout_trimmed(), "scoped");
    }

    #[test]
    fn test_run_in_directory() {
        let result = Cmd::new("pwd")
            .dir(Path::new("/tmp"))
            .run(&HostExecutor)
            .unwrap();
        assert!(result.stdout_trimmed().contains("tmp"));
    }

    #[test]
    fn test_command_line_rendering() {
        let cmd = Cmd::new("mount").args(["-t", "ext4"]).arg_path(Path::new("/dev/sda1"));
        assert_eq!(cmd.command_line(), "mount -t ext4 /dev/sda1");
    }

    #[test]
    fn test_which() {
        assert!(which("sh").is_some());
        assert!(which("nonexistent_program_12345").is_none());
    }
}
