//! Launching child task processes.
//!
//! The runner only needs a stream of output lines and a writable input. The
//! [`Launcher`] trait hides how those are obtained so runners can be driven
//! by a real process ([`ProcessLauncher`]) or by in-memory pipes in tests.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use relay_proto::AccountId;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::runner::RunnerError;

/// Timeout for graceful shutdown before force kill.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines read from a child's output, in arrival order.
pub type OutputLines = BoxStream<'static, io::Result<String>>;

/// Credentials handed to a child task.
#[derive(Clone)]
pub struct Credentials {
    pub account_id: AccountId,
    /// Opaque secret passed through to the child.
    pub secret: String,
}

impl Credentials {
    pub fn new(account_id: impl Into<AccountId>, secret: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("secret", &"***")
            .finish()
    }
}

/// The pipes of a running child task.
pub struct TaskIo {
    pub output: OutputLines,
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// Process handle, when there is a real process behind the pipes.
    pub child: Option<Child>,
}

impl TaskIo {
    /// Pipes without a process handle.
    pub fn from_pipes<R, W>(output: R, input: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            output: lines_of(output),
            input: Box::new(input),
            child: None,
        }
    }
}

/// Starts the child task for one account.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, credentials: &Credentials) -> Result<TaskIo, RunnerError>;
}

/// Split a reader into a stream of lines, ending after EOF or the first error.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// ending the stream.
pub fn lines_of<R>(reader: R) -> OutputLines
where
    R: AsyncRead + Send + Unpin + 'static,
{
    futures::stream::unfold(Some(BufReader::new(reader)), |state| async move {
        let mut reader = state?;
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(decode_lossy(&buf)), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

fn decode_lossy(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Launches `program args... --tel <account> --pwd <secret>` as a child process.
///
/// Stdout and stderr are both piped and merged into one line stream.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, credentials: &Credentials) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--tel")
            .arg(credentials.account_id.as_str())
            .arg("--pwd")
            .arg(&credentials.secret)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, credentials: &Credentials) -> Result<TaskIo, RunnerError> {
        let mut child = self
            .command(credentials)
            .spawn()
            .map_err(RunnerError::Spawn)?;

        tracing::info!(
            account = %credentials.account_id,
            pid = child.id(),
            program = %self.program,
            "spawned task process"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::MissingPipe("stderr"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or(RunnerError::MissingPipe("stdin"))?;

        let output = futures::stream::select(lines_of(stdout), lines_of(stderr)).boxed();

        Ok(TaskIo {
            output,
            input: Box::new(stdin),
            child: Some(child),
        })
    }
}

/// Stop a child: SIGTERM first, force kill after [`SHUTDOWN_TIMEOUT`].
pub async fn terminate(child: &mut Child) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id()
            && let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        {
            tracing::warn!("Failed to send SIGTERM to {}: {}", pid, e);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => {
            tracing::warn!("Task process did not exit gracefully, force killing");
            child.kill().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_lines_of_splits_and_ends() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = lines_of(rx);

        tx.write_all(b"one\ntwo\n").await.unwrap();
        drop(tx);

        assert_eq!(lines.next().await.unwrap().unwrap(), "one");
        assert_eq!(lines.next().await.unwrap().unwrap(), "two");
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lines_of_replaces_invalid_utf8() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut lines = lines_of(rx);

        tx.write_all(b"\xc4\xe3\xba\xc3 gbk\r\nok\nlast").await.unwrap();
        drop(tx);

        let first = lines.next().await.unwrap().unwrap();
        assert!(first.ends_with(" gbk"));
        assert!(first.contains('\u{FFFD}'));
        assert_eq!(lines.next().await.unwrap().unwrap(), "ok");
        assert_eq!(lines.next().await.unwrap().unwrap(), "last");
        assert!(lines.next().await.is_none());
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("13800000000", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("13800000000"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_command_appends_credentials() {
        let launcher = ProcessLauncher::new("python3").with_args(["main.py"]);
        let command = launcher.command(&Credentials::new("A", "pw"));
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["main.py", "--tel", "A", "--pwd", "pw"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_launcher_merges_output() {
        let launcher = ProcessLauncher::new("sh").with_args(["-c", "echo out; echo err >&2", "task"]);
        let io = match launcher.launch(&Credentials::new("A", "pw")).await {
            Ok(io) => io,
            Err(e) => {
                eprintln!("Skipping test: could not spawn sh: {e}");
                return;
            }
        };

        let mut lines: Vec<String> = io.output.map(|l| l.unwrap()).collect().await;
        lines.sort();
        assert_eq!(lines, ["err", "out"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let launcher = ProcessLauncher::new("/nonexistent/relay-task-binary");
        let result = launcher.launch(&Credentials::new("A", "pw")).await;
        assert!(matches!(result, Err(RunnerError::Spawn(_))));
    }
}
