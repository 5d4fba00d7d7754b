//! Task Manager - start per-account runners and track the active ones.
//!
//! At most one runner is active per account. Each runner is spawned on its
//! own tokio task and removes its entry from the active map when it ends.

use chrono::{DateTime, Utc};
use relay_proto::AccountId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use crate::hub::EventHub;
use crate::launcher::{Credentials, Launcher};
use crate::registry::CorrelationRegistry;
use crate::runner::{InputPolicy, RunnerState, TaskRunner};

/// Errors returned by manager operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// A runner for this account has not ended yet.
    #[error("task already running for account {account_id}")]
    AlreadyRunning { account_id: AccountId },
}

/// Information about an active task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskInfo {
    pub account_id: AccountId,
    pub state: RunnerState,
    pub started_at: DateTime<Utc>,
}

struct ActiveTask {
    /// Distinguishes successive runs of the same account.
    run_id: u64,
    started_at: DateTime<Utc>,
    state: watch::Receiver<RunnerState>,
}

impl ActiveTask {
    fn info(&self, account_id: &AccountId) -> ActiveTaskInfo {
        ActiveTaskInfo {
            account_id: account_id.clone(),
            state: *self.state.borrow(),
            started_at: self.started_at,
        }
    }
}

type ActiveTasks = Arc<RwLock<HashMap<AccountId, ActiveTask>>>;

/// Owner of the shared registry, hub and launcher used by every runner.
#[derive(Clone)]
pub struct TaskManager {
    registry: Arc<CorrelationRegistry>,
    hub: EventHub,
    launcher: Arc<dyn Launcher>,
    policy: InputPolicy,
    active: ActiveTasks,
    next_run: Arc<AtomicU64>,
}

impl TaskManager {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        hub: EventHub,
        launcher: Arc<dyn Launcher>,
        policy: InputPolicy,
    ) -> Self {
        Self {
            registry,
            hub,
            launcher,
            policy,
            active: Arc::new(RwLock::new(HashMap::new())),
            next_run: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn policy(&self) -> &InputPolicy {
        &self.policy
    }

    /// Start a runner for `credentials.account_id`.
    ///
    /// The returned handle resolves to the runner's terminal state; dropping
    /// it does not stop the runner.
    pub async fn start(
        &self,
        credentials: Credentials,
    ) -> Result<JoinHandle<RunnerState>, ManagerError> {
        let account_id = credentials.account_id.clone();
        let runner = TaskRunner::new(
            credentials,
            Arc::clone(&self.registry),
            self.hub.clone(),
            self.policy.clone(),
        );
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);

        {
            let mut active = self.active.write().await;
            if active.contains_key(&account_id) {
                tracing::warn!(account = %account_id, "rejected start, task already running");
                return Err(ManagerError::AlreadyRunning { account_id });
            }
            active.insert(
                account_id.clone(),
                ActiveTask {
                    run_id,
                    started_at: Utc::now(),
                    state: runner.state(),
                },
            );
        }

        tracing::info!(account = %account_id, run_id, "starting task");

        let launcher = Arc::clone(&self.launcher);
        let active = Arc::clone(&self.active);
        Ok(tokio::spawn(async move {
            let state = runner.run(launcher.as_ref()).await;

            let mut active = active.write().await;
            if active.get(&account_id).is_some_and(|t| t.run_id == run_id) {
                active.remove(&account_id);
            }
            tracing::info!(account = %account_id, ?state, "task ended");
            state
        }))
    }

    /// Start every account in turn, then announce the batch on the admin feed.
    ///
    /// Accounts that are already running are skipped. Returns the handles of
    /// the runners that were started.
    pub async fn start_all<I>(&self, accounts: I) -> Vec<JoinHandle<RunnerState>>
    where
        I: IntoIterator<Item = Credentials>,
    {
        let mut handles = Vec::new();
        for credentials in accounts {
            match self.start(credentials).await {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(error = %e, "skipping account in batch run"),
            }
        }
        self.hub.log_global("已执行所有账号任务。");
        handles
    }

    /// All active tasks, ordered by start time.
    pub async fn list_active(&self) -> Vec<ActiveTaskInfo> {
        let active = self.active.read().await;
        let mut tasks: Vec<ActiveTaskInfo> = active
            .iter()
            .map(|(account_id, task)| task.info(account_id))
            .collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    pub async fn get(&self, account_id: &AccountId) -> Option<ActiveTaskInfo> {
        self.active
            .read()
            .await
            .get(account_id)
            .map(|task| task.info(account_id))
    }

    pub async fn is_running(&self, account_id: &AccountId) -> bool {
        self.active.read().await.contains_key(account_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}
