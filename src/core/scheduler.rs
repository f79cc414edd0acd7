// Worker pool for sequential actions

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::executor::{ACTION_ABORTED, ActionRunner};
use crate::core::queue::JoinableQueue;
use crate::error::LaunchError;
use crate::model::LaunchArgs;
use crate::types::StepId;

/// One action handed to the sequential workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub event_id: StepId,
    pub action_id: StepId,
    pub launch_args: LaunchArgs,
}

/// Outcome of one action run by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub action_id: StepId,
    pub return_code: i32,
    pub finished_at: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn is_ok(&self) -> bool {
        self.return_code == 0
    }
}

/// `None` on the queue tells the worker that takes it to exit.
type Message = Option<WorkItem>;

/// Fixed number of workers pulling from one joinable queue.
///
/// The pool can be started and stopped repeatedly; each start spawns a fresh
/// set of workers and each stop waits until all of them have exited.
pub struct WorkerPool {
    size: usize,
    runner: Arc<dyn ActionRunner>,
    queue: JoinableQueue<Message>,
    results: mpsc::UnboundedSender<CompletionRecord>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        runner: Arc<dyn ActionRunner>,
        results: mpsc::UnboundedSender<CompletionRecord>,
    ) -> Self {
        Self {
            size,
            runner,
            queue: JoinableQueue::new(),
            results,
            workers: Vec::with_capacity(size),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawns the workers one by one, waiting for each to report ready.
    /// On the first failure the workers already spawned are aborted and no
    /// further worker is attempted.
    pub async fn start(&mut self) -> Result<(), LaunchError> {
        if self.is_running() {
            warn!("worker pool already running");
            return Ok(());
        }

        debug!(size = self.size, "starting the workers");
        for index in 0..self.size {
            let (ready_tx, ready_rx) = oneshot::channel();
            let handle = tokio::spawn(Self::worker_loop(
                index,
                self.runner.clone(),
                self.queue.clone(),
                self.results.clone(),
                ready_tx,
            ));

            let ready = match ready_rx.await {
                Ok(ready) => ready,
                Err(_) => Err("worker exited before reporting ready".to_string()),
            };

            if let Err(reason) = ready {
                error!(index, %reason, "worker could not be started");
                handle.abort();
                self.abort();
                return Err(LaunchError::WorkerStartFailure { index, reason });
            }
            self.workers.push(handle);
        }

        info!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), LaunchError> {
        if !self.is_running() {
            return Err(LaunchError::PoolNotRunning);
        }
        debug!(action = %item.action_id, "submitting action");
        self.queue.put(Some(item))
    }

    /// Resolves once every submitted item has been processed.
    pub async fn join(&self) {
        self.queue.join().await
    }

    /// Sends one shutdown sentinel per worker and waits until all workers
    /// have consumed theirs and exited.
    pub async fn stop(&mut self) -> Result<(), LaunchError> {
        if !self.is_running() {
            return Ok(());
        }

        debug!("sending shutdown sentinels to the workers");
        for _ in 0..self.workers.len() {
            self.queue.put(None)?;
        }
        self.queue.join().await;

        for handle in &mut self.workers {
            if let Err(err) = handle.await {
                warn!(?err, "worker did not exit cleanly");
            }
        }
        self.workers.clear();

        debug!("all workers have taken their sentinel");
        Ok(())
    }

    /// Aborts all workers without waiting for queued work.
    pub fn abort(&mut self) {
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }

    async fn worker_loop(
        index: usize,
        runner: Arc<dyn ActionRunner>,
        queue: JoinableQueue<Message>,
        results: mpsc::UnboundedSender<CompletionRecord>,
        ready: oneshot::Sender<Result<(), String>>,
    ) {
        if let Err(err) = runner.prepare_worker(index).await {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
        if ready.send(Ok(())).is_err() {
            return;
        }

        debug!(worker = index, "worker started");

        while let Some(message) = queue.get().await {
            let Some(item) = message else {
                queue.task_done();
                break;
            };

            let action_id = item.action_id.clone();
            // A panicking runner only takes its own task down, never the worker.
            let run = {
                let runner = runner.clone();
                tokio::spawn(async move { runner.run(&item).await })
            };

            let return_code = match run.await {
                Ok(Ok(code)) => code,
                Ok(Err(err)) => {
                    error!(worker = index, action = %action_id, "action failed: {err:#}");
                    ACTION_ABORTED
                }
                Err(err) => {
                    error!(worker = index, action = %action_id, %err, "action runner panicked");
                    ACTION_ABORTED
                }
            };

            // Publish before acknowledging so a joined caller sees the record.
            let _ = results.send(CompletionRecord {
                action_id,
                return_code,
                finished_at: Utc::now(),
            });
            queue.task_done();
        }

        debug!(worker = index, "worker stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingRunner {
        prepared: AtomicUsize,
        fail_at: Option<usize>,
        runs: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ActionRunner for CountingRunner {
        async fn prepare_worker(&self, index: usize) -> anyhow::Result<()> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(index) {
                return Err(anyhow!("refusing worker {index}"));
            }
            Ok(())
        }

        async fn run(&self, item: &WorkItem) -> anyhow::Result<i32> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if item.action_id.as_str() == "panics" {
                panic!("runner blew up on {}", item.action_id);
            }
            self.runs.lock().unwrap().push(item.action_id.to_string());
            Ok(if item.action_id.as_str() == "bad" { 2 } else { 0 })
        }
    }

    fn work(id: &str) -> WorkItem {
        WorkItem {
            event_id: StepId::new("e1"),
            action_id: StepId::new(id),
            launch_args: LaunchArgs::new("true", Vec::<String>::new()),
        }
    }

    #[tokio::test]
    async fn test_submitted_items_produce_completion_records() {
        let runner = Arc::new(CountingRunner::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(2, runner.clone(), tx);

        pool.start().await.unwrap();
        assert!(pool.is_running());
        assert_eq!(runner.prepared.load(Ordering::SeqCst), 2);

        pool.submit(work("ok")).unwrap();
        pool.join().await;
        pool.submit(work("bad")).unwrap();
        pool.join().await;
        pool.stop().await.unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.action_id.as_str(), "ok");
        assert!(first.is_ok());
        assert_eq!(second.return_code, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_waits_for_every_worker_to_exit() {
        let runner = Arc::new(CountingRunner::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(3, runner.clone(), tx);

        pool.start().await.unwrap();
        // pool + test + one clone per worker
        assert_eq!(Arc::strong_count(&runner), 5);

        pool.stop().await.unwrap();
        assert!(!pool.is_running());
        assert_eq!(Arc::strong_count(&runner), 2);
    }

    #[tokio::test]
    async fn test_pool_restarts_after_stop() {
        let runner = Arc::new(CountingRunner::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(1, runner.clone(), tx);

        for id in ["first", "second"] {
            pool.start().await.unwrap();
            pool.submit(work(id)).unwrap();
            pool.join().await;
            pool.stop().await.unwrap();
        }

        assert_eq!(runner.prepared.load(Ordering::SeqCst), 2);
        assert_eq!(rx.try_recv().unwrap().action_id.as_str(), "first");
        assert_eq!(rx.try_recv().unwrap().action_id.as_str(), "second");
    }

    #[tokio::test]
    async fn test_start_aborts_on_first_failing_worker() {
        let runner = Arc::new(CountingRunner {
            fail_at: Some(1),
            ..Default::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(4, runner.clone(), tx);

        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, LaunchError::WorkerStartFailure { index: 1, .. }));
        // workers 2 and 3 were never attempted
        assert_eq!(runner.prepared.load(Ordering::SeqCst), 2);
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_panicking_runner_is_recorded_as_aborted() {
        let runner = Arc::new(CountingRunner::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::new(1, runner.clone(), tx);

        pool.start().await.unwrap();
        pool.submit(work("panics")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("join must not hang after a panic");

        // the same worker keeps serving the queue
        pool.submit(work("ok")).unwrap();
        pool.join().await;
        tokio::time::timeout(Duration::from_secs(5), pool.stop())
            .await
            .expect("stop must not hang after a panic")
            .unwrap();

        let aborted = rx.try_recv().unwrap();
        assert_eq!(aborted.action_id.as_str(), "panics");
        assert_eq!(aborted.return_code, ACTION_ABORTED);
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(*runner.runs.lock().unwrap(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_submit_requires_running_pool() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(1, Arc::new(CountingRunner::default()), tx);
        assert!(matches!(
            pool.submit(work("a1")),
            Err(LaunchError::PoolNotRunning)
        ));
    }
}
