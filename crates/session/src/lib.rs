//! The persistent shell session this subsystem drives every command
//! through. Kept as a small trait plus one production implementation, so
//! higher layers depend only on the interface (the "lazy external
//! collaborator" this subsystem treats sessions as) and tests can inject a
//! scripted fake instead of spawning a real child process.

mod error;

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
pub use error::{Result, SessionError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};

/// The result of one command run through a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A long-lived child shell process, launched once under a platform
/// adapter's wrapper command. Executes commands sequentially; cwd and
/// exported environment persist across calls because the same shell
/// process is reused, never restarted, between them.
#[async_trait]
pub trait ShellSession: Send {
    async fn execute(&mut self, command: &str) -> Result<SessionOutput>;

    /// Gracefully terminate the child. Idempotent.
    async fn kill(&mut self) -> Result<()>;

    /// Synchronous fallback teardown, used when an async `kill` isn't
    /// appropriate (e.g. dropping a session during panic unwind).
    fn cleanup(&mut self);
}

/// Production [`ShellSession`]: a real child process communicating over
/// line-delimited stdin/stdout. Command boundaries are marked with a
/// per-call random sentinel so stdout can be sliced precisely even when the
/// command itself prints partial lines; stderr is captured by redirecting
/// each command's own stderr into a scratch file for the duration of that
/// one call, which is simpler and more robust than trying to interleave a
/// second sentinel onto a second pipe.
pub struct ChildProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    stderr_path: PathBuf,
    killed: bool,
}

impl ChildProcessSession {
    /// Spawn a session under `wrapper_command` (e.g.
    /// `"bwrap --unshare-net ... /bin/bash"`). Adapters do not shell-quote
    /// their output, so this splits on whitespace directly into argv rather
    /// than handing the string to `sh -c`.
    pub async fn spawn(wrapper_command: &str) -> Result<Self> {
        let mut parts = wrapper_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SessionError::Spawn(std::io::Error::other("empty wrapper command")))?;
        let args: Vec<&str> = parts.collect();

        let mut child = tokio::process::Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(SessionError::Spawn)?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));

        let stderr_path = std::env::temp_dir().join(format!(
            "synapse-session-{}-stderr.log",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&stderr_path, b"").await?;

        tracing::debug!(wrapper_command, "shell session spawned");

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr_path,
            killed: false,
        })
    }
}

#[async_trait]
impl ShellSession for ChildProcessSession {
    async fn execute(&mut self, command: &str) -> Result<SessionOutput> {
        if self.killed {
            return Err(SessionError::ChildExited);
        }

        tokio::fs::write(&self.stderr_path, b"").await?;

        let marker = format!("__synapse_done_{}__", uuid::Uuid::new_v4().simple());
        let script = format!(
            "{{ {command} ; }} 2>> {stderr_path}\necho \"{marker}:$?\"\n",
            stderr_path = self.stderr_path.display(),
        );

        self.stdin.write_all(script.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut stdout_lines = Vec::new();
        let mut exit_code = None;
        loop {
            let mut line = String::new();
            let bytes_read = self.stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.killed = true;
                tracing::warn!("session stdout closed before boundary marker; child likely died");
                return Err(SessionError::MarkerNotFound);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if let Some(code) = trimmed.strip_prefix(&marker).and_then(|s| s.strip_prefix(':')) {
                exit_code = code.trim().parse::<i32>().ok();
                break;
            }
            stdout_lines.push(trimmed.to_string());
        }

        let exit_code = exit_code.ok_or(SessionError::MarkerNotFound)?;
        let stderr = tokio::fs::read_to_string(&self.stderr_path)
            .await
            .unwrap_or_default();

        Ok(SessionOutput {
            stdout: stdout_lines.join("\n"),
            stderr,
            exit_code,
        })
    }

    async fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        let _ = self.stdin.write_all(b"exit\n").await;
        let _ = self.stdin.flush().await;

        let graceful = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            self.child.wait(),
        )
        .await;

        if graceful.is_err() {
            tracing::warn!("session did not exit gracefully; force-killing child");
            let _ = self.child.start_kill();
        }
        self.killed = true;
        let _ = tokio::fs::remove_file(&self.stderr_path).await;
        Ok(())
    }

    fn cleanup(&mut self) {
        if !self.killed {
            let _ = self.child.start_kill();
            self.killed = true;
        }
        let _ = std::fs::remove_file(&self.stderr_path);
    }
}

impl Drop for ChildProcessSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cwd_and_env_persist_across_calls() {
        let mut session = ChildProcessSession::spawn("/bin/bash").await.unwrap();
        let first = session.execute("cd /tmp").await.unwrap();
        assert_eq!(first.exit_code, 0);
        let second = session.execute("pwd").await.unwrap();
        assert_eq!(second.stdout, "/tmp");
        assert!(!second.stderr.contains("No such file"));

        let third = session.execute("export FOO=bar").await.unwrap();
        assert_eq!(third.exit_code, 0);
        let fourth = session.execute("echo $FOO").await.unwrap();
        assert_eq!(fourth.stdout, "bar");

        session.kill().await.unwrap();
    }

    #[tokio::test]
    async fn captures_nonzero_exit_code_and_stderr() {
        let mut session = ChildProcessSession::spawn("/bin/bash").await.unwrap();
        let result = session
            .execute("cat /definitely/does/not/exist")
            .await
            .unwrap();
        assert_ne!(result.exit_code, 0);
        assert!(result.stderr.contains("No such file"));
        session.kill().await.unwrap();
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let mut session = ChildProcessSession::spawn("/bin/bash").await.unwrap();
        session.kill().await.unwrap();
        session.kill().await.unwrap();
    }

    #[tokio::test]
    async fn execute_after_kill_fails() {
        let mut session = ChildProcessSession::spawn("/bin/bash").await.unwrap();
        session.kill().await.unwrap();
        let result = session.execute("echo hi").await;
        assert!(matches!(result, Err(SessionError::ChildExited)));
    }
}
