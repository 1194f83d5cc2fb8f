//! Concurrency guards for periodic work.
//!
//! [`SingleFlight`] keeps at most one run per key in flight and drops
//! extra attempts. [`TaskQueue`] is the opposite shape: strictly
//! ordered, one job at a time, with named deduplication while queued.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Result of asking [`SingleFlight::run`] for a run.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran to completion, successfully or not.
    Completed(T),
    /// The key was busy or the precondition said no; nothing ran.
    Skipped,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Skipped => None,
        }
    }

    pub fn was_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }
}

/// Keyed mutual exclusion for fire-and-forget work. While a key is
/// running, further runs for it are dropped rather than queued.
pub struct SingleFlight {
    running: scc::HashMap<String, ()>,
}

struct RunningGuard<'a> {
    running: &'a scc::HashMap<String, ()>,
    key: &'a str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        // Runs on every exit path, including panic and cancellation
        let _ = self.running.remove_sync(self.key);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            running: scc::HashMap::new(),
        }
    }

    /// Run `op` unless `key` is already in flight or `should_run`
    /// returns false. The key is released when `op` finishes, whether
    /// it succeeded or not.
    pub async fn run<T, Fut>(
        &self,
        key: &str,
        should_run: impl FnOnce() -> bool,
        op: impl FnOnce() -> Fut,
    ) -> Outcome<T>
    where
        Fut: Future<Output = T>,
    {
        if self.running.read_async(key, |_, _| ()).await.is_some() {
            debug!(key, "already running, skipping");
            return Outcome::Skipped;
        }
        if !should_run() {
            debug!(key, "precondition not met, skipping");
            return Outcome::Skipped;
        }
        if self.running.insert_async(key.to_owned(), ()).await.is_err() {
            // Lost the claim race against a concurrent caller
            debug!(key, "already running, skipping");
            return Outcome::Skipped;
        }

        let _guard = RunningGuard {
            running: &self.running,
            key,
        };
        Outcome::Completed(op().await)
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

type QueuedWork = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedJob {
    name: Option<String>,
    work: QueuedWork,
}

/// Strictly ordered background work. Jobs run one at a time on a
/// dedicated worker task, in submission order. A named job is dropped
/// while another with the same name is still waiting, so bursts of
/// identical message edits collapse into one.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    queued_names: Arc<scc::HashMap<String, ()>>,
}

impl TaskQueue {
    /// Create the queue and spawn its worker onto the current runtime.
    pub fn spawn() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedJob>();
        let queued_names = Arc::new(scc::HashMap::new());
        let worker_names = Arc::clone(&queued_names);

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Some(name) = &job.name {
                    // Release the name before running so a fresh job
                    // under it can queue while this one executes
                    let _ = worker_names.remove_async(name).await;
                }
                job.work.await;
            }
            debug!("task queue channel closed, worker stopping");
        });

        Self {
            sender,
            queued_names,
        }
    }

    /// Queue a job. A named job is ignored when one with the same name
    /// is already waiting. Returns whether the job was accepted.
    pub fn push<F>(&self, name: Option<&str>, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(name) = name {
            if self.queued_names.insert_sync(name.to_owned(), ()).is_err() {
                debug!(name, "job already queued, dropping duplicate");
                return false;
            }
        }

        let job = QueuedJob {
            name: name.map(str::to_owned),
            work: Box::pin(work),
        };
        if self.sender.send(job).is_err() {
            warn!("task queue worker is gone, dropping job");
            if let Some(name) = name {
                let _ = self.queued_names.remove_sync(name);
            }
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_runs_once_concurrently() {
        let flights = SingleFlight::new();
        let count = AtomicUsize::new(0);
        let first = flights.run("server-42", || true, || async {
            count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            "done"
        });
        let second = flights.run("server-42", || true, || async {
            count.fetch_add(1, Ordering::SeqCst);
            "done"
        });
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Outcome::Completed("done"));
        assert_eq!(second, Outcome::Skipped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_run_concurrently() {
        let flights = SingleFlight::new();
        let first = flights.run("server-1", || true, || async { 1 });
        let second = flights.run("server-2", || true, || async { 2 });
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Outcome::Completed(1));
        assert_eq!(second, Outcome::Completed(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_is_released_after_completion() {
        let flights = SingleFlight::new();
        let count = AtomicUsize::new(0);
        for _ in 0..2 {
            let outcome = flights
                .run("overview-1", || true, || async {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .await;
            assert!(!outcome.was_skipped());
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_is_released_after_failure() {
        let flights = SingleFlight::new();
        let failed: Outcome<Result<(), &str>> = flights
            .run("overview-1", || true, || async { Err("api down") })
            .await;
        assert_eq!(failed, Outcome::Completed(Err("api down")));

        // The failure must not leave the key stuck
        let retried = flights
            .run("overview-1", || true, || async { Ok::<(), &str>(()) })
            .await;
        assert_eq!(retried, Outcome::Completed(Ok(())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_precondition_skips_without_running() {
        let flights = SingleFlight::new();
        let count = AtomicUsize::new(0);
        let outcome = flights
            .run("server-42", || false, || async {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(outcome.was_skipped());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_jobs_in_submission_order() {
        let queue = TaskQueue::spawn();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();

        for i in 1..=3 {
            let log = Arc::clone(&log);
            queue.push(None, async move {
                if i == 1 {
                    // The first job dawdles; later jobs must still wait
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                log.lock().unwrap().push(i);
            });
        }
        queue.push(None, async move {
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_drops_duplicate_names_while_queued() {
        let queue = TaskQueue::spawn();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        // The worker has not polled yet, so all three pushes happen
        // while the queue is untouched
        let blocker = queue.push(None, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        let log_first = Arc::clone(&log);
        let first = queue.push(Some("edit-900"), async move {
            log_first.lock().unwrap().push("first");
        });
        let log_dup = Arc::clone(&log);
        let duplicate = queue.push(Some("edit-900"), async move {
            log_dup.lock().unwrap().push("duplicate");
        });

        assert!(blocker);
        assert!(first);
        assert!(!duplicate);

        let (done_tx, done_rx) = oneshot::channel();
        queue.push(None, async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first"]);

        // Once dequeued the name is free again
        let log_again = Arc::clone(&log);
        assert!(queue.push(Some("edit-900"), async move {
            log_again.lock().unwrap().push("again");
        }));
        let (done_tx, done_rx) = oneshot::channel();
        queue.push(None, async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "again"]);
    }
}
