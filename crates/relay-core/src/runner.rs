//! Per-account task runner.
//!
//! A runner spawns one child task, forwards every output line to the
//! account's feed, and answers the child's input requests:
//!
//! ```text
//! Starting -> Running -> (AwaitingInput <-> Running)* -> Finished | Failed
//! ```
//!
//! On a request line the runner registers the callback id, publishes the
//! prompt, pauses for the settle delay, then waits a bounded time for a
//! submission. Whatever happens, exactly one line is written back to the
//! child: the submitted value or the fallback token.

use futures::StreamExt;
use relay_proto::{AccountId, Event, InputRequest, InputRequestEvent, Line, decode_line};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::watch;

use crate::hub::EventHub;
use crate::launcher::{Credentials, Launcher, OutputLines, TaskIo, terminate};
use crate::registry::{CorrelationRegistry, WaitOutcome};

/// How long to wait for a finished child to report its exit status.
const EXIT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that end a runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The child process could not be started.
    #[error("failed to spawn task: {0}")]
    Spawn(#[source] io::Error),

    /// The spawned process did not expose a required pipe.
    #[error("task process has no {0} pipe")]
    MissingPipe(&'static str),

    /// Reading the child's output failed.
    #[error("failed to read task output: {0}")]
    Read(#[source] io::Error),

    /// Writing an answer to the child's input failed.
    #[error("failed to write task input: {0}")]
    Write(#[source] io::Error),
}

/// Observable lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Starting,
    Running,
    AwaitingInput,
    Finished,
    Failed,
}

impl RunnerState {
    /// Returns `true` once the runner will not transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunnerState::Finished | RunnerState::Failed)
    }
}

/// How input requests are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPolicy {
    /// Enforced wait bound for a submission.
    pub wait_bound: Duration,
    /// Pause between publishing a prompt and starting to wait.
    ///
    /// Gives observers a chance to render the prompt before a fast automated
    /// submitter answers. It narrows the race, it does not close it.
    pub settle_delay: Duration,
    /// Token written when no submission arrives.
    pub fallback: String,
    /// Use the child's advisory timeout as the bound when it is non-zero.
    pub honor_advisory_timeout: bool,
}

impl Default for InputPolicy {
    fn default() -> Self {
        Self {
            wait_bound: Duration::from_secs(15),
            settle_delay: Duration::from_millis(500),
            fallback: "N".to_string(),
            honor_advisory_timeout: false,
        }
    }
}

impl InputPolicy {
    /// Bound enforced for a request carrying `advisory_ms`.
    pub fn bound_for(&self, advisory_ms: u64) -> Duration {
        if self.honor_advisory_timeout && advisory_ms > 0 {
            Duration::from_millis(advisory_ms)
        } else {
            self.wait_bound
        }
    }
}

/// Drives the child task of one account.
pub struct TaskRunner {
    credentials: Credentials,
    registry: Arc<CorrelationRegistry>,
    hub: EventHub,
    policy: InputPolicy,
    state: watch::Sender<RunnerState>,
}

impl TaskRunner {
    pub fn new(
        credentials: Credentials,
        registry: Arc<CorrelationRegistry>,
        hub: EventHub,
        policy: InputPolicy,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Starting);
        Self {
            credentials,
            registry,
            hub,
            policy,
            state,
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.credentials.account_id
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RunnerState) {
        self.state.send_replace(state);
    }

    /// Launch the child and drive it to completion. Returns the terminal state.
    pub async fn run(self, launcher: &dyn Launcher) -> RunnerState {
        let account = self.credentials.account_id.clone();
        self.hub.log(&account, "任务已启动");
        self.hub.log(&account, format!("检查账号：{account}"));

        let io = match launcher.launch(&self.credentials).await {
            Ok(io) => io,
            Err(e) => {
                tracing::error!(account = %account, error = %e, "task launch failed");
                self.hub.log(&account, format!("运行出错: {e}"));
                self.set_state(RunnerState::Failed);
                return RunnerState::Failed;
            }
        };
        self.set_state(RunnerState::Running);

        let TaskIo {
            mut output,
            mut input,
            mut child,
        } = io;
        let result = self.pump(&mut output, &mut input).await;
        drop(input);

        let released = self.registry.cancel_all(&account);
        if released > 0 {
            tracing::debug!(account = %account, released, "released pending input requests");
        }

        let state = match result {
            Ok(()) => {
                let message = match child.as_mut() {
                    Some(child) => finish_message(child).await,
                    None => "任务完成".to_string(),
                };
                self.hub.log(&account, message);
                RunnerState::Finished
            }
            Err(e) => {
                tracing::error!(account = %account, error = %e, "task runner failed");
                if let Some(child) = child.as_mut()
                    && let Err(kill_err) = terminate(child).await
                {
                    tracing::warn!(account = %account, error = %kill_err, "failed to stop task process");
                }
                self.hub.log(&account, format!("运行出错: {e}"));
                RunnerState::Failed
            }
        };

        self.set_state(state);
        state
    }

    async fn pump(
        &self,
        output: &mut OutputLines,
        input: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RunnerError> {
        while let Some(line) = output.next().await {
            let line = line.map_err(RunnerError::Read)?;
            self.handle_line(&line, input).await?;
        }
        Ok(())
    }

    async fn handle_line(
        &self,
        line: &str,
        input: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RunnerError> {
        let account = self.account_id();
        match decode_line(line) {
            Ok(Line::Log(text)) => {
                if !text.is_empty() {
                    self.hub.log(account, text);
                }
                Ok(())
            }
            Ok(Line::Request(request)) => self.handle_request(request, input).await,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "undecodable input request, forwarding as log");
                self.hub.log(account, line.trim());
                Ok(())
            }
        }
    }

    async fn handle_request(
        &self,
        request: InputRequest,
        input: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), RunnerError> {
        let account = self.account_id();
        let callback = request.resolve_callback();

        // Registered before publishing so an immediate answer finds the entry.
        let handle = match self.registry.register(&callback, account) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "input request rejected");
                self.hub.log(account, format!("输入请求ID冲突: {callback}"));
                return write_line(input, &self.policy.fallback).await;
            }
        };

        self.hub
            .log(account, format!("收到输入请求: {}", request.prompt));
        self.hub.publish_to_account(
            account,
            Event::InputRequest(InputRequestEvent {
                account_id: account.clone(),
                prompt: request.prompt.clone(),
                timeout: request.timeout,
                callback: callback.clone(),
            }),
        );

        tokio::time::sleep(self.policy.settle_delay).await;
        self.set_state(RunnerState::AwaitingInput);

        let bound = self.policy.bound_for(request.timeout);
        let reply = match handle.wait(bound).await {
            WaitOutcome::Fulfilled(value) => value,
            WaitOutcome::TimedOut => {
                tracing::info!(account = %account, %callback, ?bound, "input request timed out, sending fallback");
                self.policy.fallback.clone()
            }
            WaitOutcome::Cancelled => self.policy.fallback.clone(),
        };
        self.registry.remove(&callback);
        self.set_state(RunnerState::Running);

        write_line(input, &reply).await
    }
}

async fn write_line(
    input: &mut (dyn AsyncWrite + Send + Unpin),
    value: &str,
) -> Result<(), RunnerError> {
    let mut line = String::with_capacity(value.len() + 1);
    line.push_str(value);
    line.push('\n');
    input
        .write_all(line.as_bytes())
        .await
        .map_err(RunnerError::Write)?;
    input.flush().await.map_err(RunnerError::Write)
}

async fn finish_message(child: &mut Child) -> String {
    match tokio::time::timeout(EXIT_STATUS_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => match status.code() {
            Some(code) => format!("任务完成 (exit code {code})"),
            None => "任务完成 (terminated by signal)".to_string(),
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to read task exit status");
            "任务完成".to_string()
        }
        Err(_) => {
            // Output closed but the process lingers.
            if let Err(e) = terminate(child).await {
                tracing::warn!(error = %e, "failed to stop lingering task process");
            }
            "任务完成".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = InputPolicy::default();
        assert_eq!(policy.wait_bound, Duration::from_secs(15));
        assert_eq!(policy.settle_delay, Duration::from_millis(500));
        assert_eq!(policy.fallback, "N");
        assert!(!policy.honor_advisory_timeout);
    }

    #[test]
    fn test_fixed_bound_ignores_advisory_timeout() {
        let policy = InputPolicy::default();
        assert_eq!(policy.bound_for(30_000), Duration::from_secs(15));
    }

    #[test]
    fn test_advisory_bound_when_enabled() {
        let policy = InputPolicy {
            honor_advisory_timeout: true,
            ..InputPolicy::default()
        };
        assert_eq!(policy.bound_for(30_000), Duration::from_secs(30));
        assert_eq!(policy.bound_for(0), Duration::from_secs(15));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RunnerState::Finished.is_terminal());
        assert!(RunnerState::Failed.is_terminal());
        assert!(!RunnerState::Running.is_terminal());
        assert!(!RunnerState::AwaitingInput.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&RunnerState::AwaitingInput).unwrap();
        assert_eq!(json, r#""awaiting_input""#);
    }
}
