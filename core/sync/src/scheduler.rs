//! Debounced remote flushes, one pending push per document.

use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Deferred remote push.
pub type FlushJob = BoxFuture<'static, ()>;

struct Flush {
    id: u64,
    /// `None` once the timer fired and the job is running.
    job: Option<FlushJob>,
    task: JoinHandle<()>,
}

impl Flush {
    fn is_waiting(&self) -> bool {
        self.job.is_some()
    }
}

type FlushMap = Arc<Mutex<HashMap<String, Flush>>>;

/// Schedules remote pushes after a quiet period.
///
/// Scheduling a document that already has a waiting flush cancels and
/// replaces it, so rapid saves coalesce into a single remote write. A flush
/// stays tracked while its job runs, so [`cancel`](Self::cancel) can wait for
/// it to finish instead of racing it.
pub struct FlushScheduler {
    delay: Duration,
    flushes: FlushMap,
    next_id: AtomicU64,
}

impl FlushScheduler {
    /// Create a scheduler that runs each job `delay` after its last schedule.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            flushes: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Quiet period before a job runs.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `job` for `document`, superseding a waiting flush for it.
    ///
    /// A flush already running is left to finish.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, document: &str, job: FlushJob) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Insert before the timer can look the entry up
        let previous = {
            let mut flushes = self.flushes.lock().unwrap();
            let task = tokio::spawn(Self::run_after(
                Arc::clone(&self.flushes),
                document.to_string(),
                id,
                self.delay,
            ));
            flushes.insert(
                document.to_string(),
                Flush {
                    id,
                    job: Some(job),
                    task,
                },
            )
        };

        if let Some(previous) = previous.filter(Flush::is_waiting) {
            previous.task.abort();
            debug!(document, "Superseded pending flush");
        }
    }

    async fn run_after(flushes: FlushMap, document: String, id: u64, delay: Duration) {
        sleep(delay).await;

        let job = {
            let mut flushes = flushes.lock().unwrap();
            match flushes.get_mut(&document) {
                Some(flush) if flush.id == id => flush.job.take(),
                _ => None,
            }
        };
        let Some(job) = job else {
            return;
        };

        debug!(document = %document, "Running scheduled flush");
        job.await;

        let mut flushes = flushes.lock().unwrap();
        if flushes.get(&document).is_some_and(|flush| flush.id == id) {
            flushes.remove(&document);
        }
    }

    /// Stop the flush for `document`.
    ///
    /// A waiting flush is dropped; a running one is awaited, so once this
    /// returns no push for `document` is in flight.
    ///
    /// # Returns
    /// Whether a flush was waiting or running.
    pub async fn cancel(&self, document: &str) -> bool {
        let flush = self.flushes.lock().unwrap().remove(document);
        let Some(flush) = flush else {
            return false;
        };

        if flush.is_waiting() {
            flush.task.abort();
            debug!(document, "Cancelled pending flush");
        } else {
            debug!(document, "Waiting for running flush");
            let _ = flush.task.await;
        }
        true
    }

    /// Cancel every waiting flush; running ones finish on their own.
    pub fn cancel_all(&self) -> usize {
        let (waiting, _running) = self.drain();
        for flush in &waiting {
            flush.task.abort();
        }
        waiting.len()
    }

    /// Run every waiting flush now and wait for the running ones.
    ///
    /// # Returns
    /// Number of waiting flushes that were run.
    pub async fn flush_pending(&self) -> usize {
        let (waiting, running) = self.drain();
        let count = waiting.len();

        let jobs = waiting.into_iter().filter_map(|mut flush| {
            flush.task.abort();
            flush.job.take()
        });
        let tasks = running.into_iter().map(|flush| flush.task);
        futures::join!(join_all(jobs), join_all(tasks));
        count
    }

    /// Whether `document` has a flush waiting for its timer.
    pub fn is_pending(&self, document: &str) -> bool {
        self.flushes
            .lock()
            .unwrap()
            .get(document)
            .is_some_and(Flush::is_waiting)
    }

    /// Documents with a flush waiting for its timer, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut documents: Vec<String> = self
            .flushes
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, flush)| flush.is_waiting())
            .map(|(document, _)| document.clone())
            .collect();
        documents.sort();
        documents
    }

    /// Remove every tracked flush, split into waiting and running.
    fn drain(&self) -> (Vec<Flush>, Vec<Flush>) {
        self.flushes
            .lock()
            .unwrap()
            .drain()
            .map(|(_, flush)| flush)
            .partition(Flush::is_waiting)
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if let Ok(flushes) = self.flushes.lock() {
            for flush in flushes.values().filter(|flush| flush.is_waiting()) {
                flush.task.abort();
            }
        }
    }
}
