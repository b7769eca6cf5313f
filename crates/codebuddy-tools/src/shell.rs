use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellRunResult {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellRunResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// Trimmed stdout followed by trimmed stderr, blank sections skipped.
    pub fn combined_output(&self) -> String {
        [self.stdout.trim_end(), self.stderr.trim_end()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Turns timeouts and non-zero exits into errors carrying the output.
    pub fn into_output(self, what: &str, timeout: Duration) -> Result<String> {
        if self.timed_out {
            return Err(anyhow!("{what} timed out after {}s", timeout.as_secs()));
        }
        let output = self.combined_output();
        match self.status {
            Some(0) => Ok(output),
            Some(code) if output.is_empty() => Err(anyhow!("{what} exited with status {code}")),
            Some(code) => Err(anyhow!("{what} exited with status {code}:\n{output}")),
            None => Err(anyhow!("{what} was terminated by a signal")),
        }
    }
}

pub trait ShellRunner {
    fn run(&self, cmd: &str, cwd: &Path, timeout: Duration) -> Result<ShellRunResult>;
}

/// Runs through `sh -c` (or `cmd /C` on Windows). The child is killed when
/// the timeout elapses.
#[derive(Debug, Default)]
pub struct PlatformShellRunner;

impl ShellRunner for PlatformShellRunner {
    fn run(&self, cmd: &str, cwd: &Path, timeout: Duration) -> Result<ShellRunResult> {
        let mut child = spawn_shell(cmd, cwd)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (status, timed_out) = match child.wait_timeout(timeout)? {
            Some(status) => (status.code(), false),
            None => {
                child.kill()?;
                (child.wait()?.code(), true)
            }
        };

        Ok(ShellRunResult {
            status,
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
            timed_out,
        })
    }
}

fn spawn_shell(cmd: &str, cwd: &Path) -> Result<Child> {
    let mut command = shell_command(cmd);
    command
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
        .spawn()
        .map_err(|err| anyhow!("failed to spawn '{cmd}' in '{}': {err}", cwd.display()))
}

#[cfg(target_os = "windows")]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(cmd);
    command
}

#[cfg(not(target_os = "windows"))]
fn shell_command(cmd: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    command
}

// Pipes are drained on their own threads so a chatty child cannot block on
// a full pipe while we wait for it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    }))
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn runs_command_and_captures_both_streams() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = PlatformShellRunner
            .run("echo codebuddy; echo oops >&2", dir.path(), Duration::from_secs(5))
            .expect("run command");
        assert!(out.succeeded());
        assert_eq!(out.stdout.trim(), "codebuddy");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.combined_output(), "codebuddy\noops");
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn kills_command_after_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = PlatformShellRunner
            .run("sleep 5", dir.path(), Duration::from_millis(200))
            .expect("run command");
        assert!(out.timed_out);
        let err = out
            .into_output("sleep", Duration::from_millis(200))
            .expect_err("timeout is an error");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn non_zero_exit_becomes_error_with_output() {
        let result = ShellRunResult {
            status: Some(2),
            stdout: String::new(),
            stderr: "no such file\n".to_string(),
            timed_out: false,
        };
        let err = result
            .into_output("ls missing", Duration::from_secs(1))
            .expect_err("non-zero exit");
        assert_eq!(err.to_string(), "ls missing exited with status 2:\nno such file");
    }
}
