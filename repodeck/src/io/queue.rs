//! Per-key serial queues.
//!
//! Each key owns one lane: an unbounded channel drained by a single worker
//! task that runs jobs one at a time. Submission is synchronous, so the order
//! of `submit` calls is the execution order for that key. Lanes for
//! different keys run independently.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Arena of serial lanes keyed by `K`, created on demand.
pub struct SerialQueues<K> {
    lanes: Mutex<HashMap<K, mpsc::UnboundedSender<Job>>>,
}

impl<K> Default for SerialQueues<K> {
    fn default() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> SerialQueues<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `job` to the lane for `key` and return a receiver for its output.
    ///
    /// Must be called from within a tokio runtime. The job runs to completion even if
    /// the receiver is dropped.
    pub fn submit<F, T>(&self, key: K, job: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(job.await);
        });

        let mut lanes = self.lanes.lock();
        let job = match lanes.get(&key) {
            Some(lane) => match lane.send(job) {
                Ok(()) => return rx,
                // Worker is gone (panicked job or runtime shutdown); start a fresh lane.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        debug!(key = ?key, "starting serial lane");
        let lane = spawn_lane();
        let _ = lane.send(job);
        lanes.insert(key, lane);
        rx
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Drop the lane for `key`. Jobs already queued still run.
    pub fn remove(&self, key: &K) {
        self.lanes.lock().remove(key);
    }
}

fn spawn_lane() -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            job.await;
        }
    });
    tx
}
