//! Join barrier for the tasks of one statement.
//!
//! A [`Supervisor`] spawns tasks, waits for all of them and folds their exit
//! statuses into one: the first error in submission order, or success.
//! Dropping it aborts whatever is still running.
//!
//! While it waits, a supervisor can also own the interrupt signal: Ctrl-C then
//! cancels every task it tracks and the wait returns
//! [`ExitStatus::INTERRUPTED`]. At most one supervisor owns the signal at any
//! time; nested supervisors (pipelines) are created without it.

use crate::command::ExitStatus;
use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::{JoinError, JoinHandle};

static SIGNAL_OWNED: AtomicBool = AtomicBool::new(false);

pub struct Supervisor {
    tasks: Vec<JoinHandle<Result<ExitStatus>>>,
    handle_signals: bool,
}

impl Supervisor {
    /// A supervisor that cancels its tasks on Ctrl-C.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            handle_signals: true,
        }
    }

    pub fn without_signals() -> Self {
        Self {
            tasks: Vec::new(),
            handle_signals: false,
        }
    }

    /// Starts `task` right away, concurrently with the caller.
    pub fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = Result<ExitStatus>> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }

    /// Waits for every submitted task and aggregates their statuses.
    pub async fn wait_for_all(&mut self) -> ExitStatus {
        let owner = if self.handle_signals {
            SignalOwner::acquire()
        } else {
            None
        };
        let Some(_owner) = owner else {
            return join_in_order(&mut self.tasks).await;
        };

        let joined = tokio::select! {
            status = join_in_order(&mut self.tasks) => Some(status),
            Ok(()) = tokio::signal::ctrl_c() => None,
        };
        match joined {
            Some(status) => status,
            None => {
                tracing::debug!(tasks = self.tasks.len(), "interrupted");
                self.cancel_all();
                ExitStatus::INTERRUPTED
            }
        }
    }

    /// Aborts every task that is still running.
    pub fn cancel_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn join_in_order(tasks: &mut Vec<JoinHandle<Result<ExitStatus>>>) -> ExitStatus {
    let mut aggregate = ExitStatus::success();
    for task in tasks.iter_mut() {
        let status = status_of(task.await);
        if aggregate.is_success() && status.is_error() {
            aggregate = status;
        }
    }
    tasks.clear();
    aggregate
}

fn status_of(joined: Result<Result<ExitStatus>, JoinError>) -> ExitStatus {
    match joined {
        Ok(Ok(status)) => status,
        // the task's own boundary has already reported the fault to the user
        Ok(Err(e)) => {
            tracing::debug!("task failed: {:#}", e);
            ExitStatus::error(1)
        }
        Err(e) if e.is_cancelled() => ExitStatus::INTERRUPTED,
        Err(e) => {
            tracing::error!("task panicked: {}", e);
            ExitStatus::error(1)
        }
    }
}

/// Marks the interrupt signal as owned until dropped.
struct SignalOwner;

impl SignalOwner {
    fn acquire() -> Option<Self> {
        SIGNAL_OWNED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SignalOwner)
    }
}

impl Drop for SignalOwner {
    fn drop(&mut self) {
        SIGNAL_OWNED.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_tasks_is_success() {
        let mut supervisor = Supervisor::without_signals();
        assert_eq!(supervisor.wait_for_all().await, ExitStatus::success());
    }

    #[tokio::test]
    async fn test_error_wins_in_any_submission_order() {
        for error_first in [true, false] {
            let mut supervisor = Supervisor::without_signals();
            let failing = async { Ok::<_, anyhow::Error>(ExitStatus::error(2)) };
            let passing = async { Ok::<_, anyhow::Error>(ExitStatus::success()) };
            if error_first {
                supervisor.submit(failing);
                supervisor.submit(passing);
            } else {
                supervisor.submit(passing);
                supervisor.submit(failing);
            }
            assert_eq!(supervisor.wait_for_all().await, ExitStatus::error(2));
        }
    }

    #[tokio::test]
    async fn test_first_error_in_submission_order() {
        let mut supervisor = Supervisor::without_signals();
        supervisor.submit(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, anyhow::Error>(ExitStatus::error(3))
        });
        supervisor.submit(async { Ok::<_, anyhow::Error>(ExitStatus::error(4)) });
        assert_eq!(supervisor.wait_for_all().await.code(), 3);
    }

    #[tokio::test]
    async fn test_faults_and_panics_become_errors() {
        let mut supervisor = Supervisor::without_signals();
        supervisor.submit(async { Err::<ExitStatus, _>(anyhow!("boom")) });
        assert_eq!(supervisor.wait_for_all().await, ExitStatus::error(1));

        let mut supervisor = Supervisor::without_signals();
        supervisor.submit(async {
            let codes: Vec<i32> = Vec::new();
            Ok::<_, anyhow::Error>(ExitStatus::from_code(codes[0]))
        });
        assert_eq!(supervisor.wait_for_all().await, ExitStatus::error(1));
    }

    #[tokio::test]
    async fn test_drop_cancels_running_tasks() {
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let mut supervisor = Supervisor::without_signals();
            let finished = finished.clone();
            supervisor.submit(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(ExitStatus::success())
            });
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
