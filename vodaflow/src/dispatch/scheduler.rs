//! Background execution of pipeline runs.
//!
//! Each submission becomes one tokio task. A pipeline name stays marked busy
//! from submission until its task ends, however it ends, so the same
//! pipeline never runs twice at once over the same data directory.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Why a run could not be started or finished.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The pipeline is still running from an earlier submission.
    #[error("{0} is already running")]
    Busy(String),
    /// No pipeline is installed for the command.
    #[error("{0}: pipeline not installed")]
    Unavailable(String),
    /// The task panicked or was aborted.
    #[error("{0} crashed: {1}")]
    Crashed(String, String),
}

/// Clears a busy flag when dropped, including during unwinding.
struct BusyGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.name);
        debug!(pipeline = %self.name, "Pipeline released");
    }
}

/// A submitted run.
#[derive(Debug)]
pub struct RunHandle<T> {
    name: String,
    handle: JoinHandle<T>,
}

impl<T> RunHandle<T> {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true once the task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run to end.
    pub async fn join(self) -> Result<T, SchedulerError> {
        self.handle.await.map_err(|e| {
            error!(pipeline = %self.name, error = %e, "Pipeline task crashed");
            SchedulerError::Crashed(self.name.clone(), e.to_string())
        })
    }
}

/// Runs jobs in the background, at most one per pipeline name.
#[derive(Debug, Clone, Default)]
pub struct PipelineScheduler {
    busy: Arc<Mutex<HashSet<String>>>,
}

impl PipelineScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a run of `name` is in flight.
    #[must_use]
    pub fn is_busy(&self, name: &str) -> bool {
        self.busy.lock().contains(name)
    }

    /// Starts `job` as the run of `name`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn submit<F>(&self, name: &str, job: F) -> Result<RunHandle<F::Output>, SchedulerError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.busy.lock().insert(name.to_string()) {
            return Err(SchedulerError::Busy(name.to_string()));
        }
        let guard = BusyGuard {
            busy: self.busy.clone(),
            name: name.to_string(),
        };
        debug!(pipeline = name, "Pipeline submitted");
        let handle = tokio::spawn(async move {
            let _guard = guard;
            job.await
        });
        Ok(RunHandle {
            name: name.to_string(),
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_second_submission_is_rejected_while_busy() {
        let scheduler = PipelineScheduler::new();
        let (release, wait) = oneshot::channel::<()>();

        let first = scheduler
            .submit("cash", async move {
                let _ = wait.await;
                1
            })
            .unwrap();

        assert!(scheduler.is_busy("cash"));
        assert_eq!(
            scheduler.submit("cash", async { 2 }).unwrap_err(),
            SchedulerError::Busy("cash".to_string())
        );
        let other = scheduler.submit("service", async { 3 }).unwrap();
        assert_eq!(other.join().await.unwrap(), 3);

        release.send(()).unwrap();
        assert_eq!(first.join().await.unwrap(), 1);
        assert!(!scheduler.is_busy("cash"));
        assert_eq!(scheduler.submit("cash", async { 4 }).unwrap().join().await.unwrap(), 4);
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_panicking_job_releases_flag() {
        let scheduler = PipelineScheduler::new();

        let handle = scheduler
            .submit("operational", async { panic!("boom") })
            .unwrap();

        assert!(matches!(
            handle.join().await,
            Err(SchedulerError::Crashed(name, _)) if name == "operational"
        ));
        assert!(!scheduler.is_busy("operational"));
    }
}
