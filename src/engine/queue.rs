// src/engine/queue.rs

//! The queue fabric: named FIFO queues that move jobs between stages.
//!
//! Handing a job to a queue hands over the right to mutate it; the next
//! stage to dequeue it becomes its owner. Every receive takes a timeout so
//! the caller can re-check the control flags between waits.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::job::SharedJob;
use crate::stages::listener::BrokerMessage;

/// A thread-safe FIFO with timed receive.
#[derive(Debug)]
pub struct NamedQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> NamedQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn put(&self, item: T) {
        self.items.lock().push_back(item);
        trace!(queue = self.name, "item enqueued");
        self.notify.notify_one();
    }

    pub fn try_get(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait up to `timeout` for an item.
    pub async fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent `put` is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_get() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_get();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove and return the first item matching `pred`.
    pub fn remove_where(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let mut items = self.items.lock();
        let pos = items.iter().position(|item| pred(item))?;
        items.remove(pos)
    }

    pub fn contains_where(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.items.lock().iter().any(|item| pred(item))
    }
}

impl<T: Clone> NamedQueue<T> {
    /// Copy of the current contents, front first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }
}

impl NamedQueue<SharedJob> {
    pub fn contains_job(&self, jobid: &str) -> bool {
        self.contains_where(|job| job.lock().jobid == jobid)
    }

    pub fn remove_job(&self, jobid: &str) -> Option<SharedJob> {
        self.remove_where(|job| job.lock().jobid == jobid)
    }

    pub fn jobids(&self) -> Vec<String> {
        self.items.lock().iter().map(|job| job.lock().jobid.clone()).collect()
    }
}

impl NamedQueue<String> {
    pub fn contains_id(&self, id: &str) -> bool {
        self.contains_where(|item| item == id)
    }
}

pub type JobQueue = NamedQueue<SharedJob>;

/// The fixed set of queues connecting the stages.
#[derive(Debug)]
pub struct Queues {
    pub jobs: JobQueue,
    pub validated_jobs: JobQueue,
    pub data_in: JobQueue,
    pub finished_data_in: JobQueue,
    pub failed_data_in: JobQueue,
    pub payloads: JobQueue,
    pub monitored_payloads: JobQueue,
    pub failed_payloads: JobQueue,
    pub data_out: JobQueue,
    pub finished_jobs: JobQueue,
    pub failed_jobs: JobQueue,
    pub completed_jobs: JobQueue,
    pub completed_jobids: NamedQueue<String>,
    pub messages: NamedQueue<BrokerMessage>,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            jobs: NamedQueue::new("jobs"),
            validated_jobs: NamedQueue::new("validated_jobs"),
            data_in: NamedQueue::new("data_in"),
            finished_data_in: NamedQueue::new("finished_data_in"),
            failed_data_in: NamedQueue::new("failed_data_in"),
            payloads: NamedQueue::new("payloads"),
            monitored_payloads: NamedQueue::new("monitored_payloads"),
            failed_payloads: NamedQueue::new("failed_payloads"),
            data_out: NamedQueue::new("data_out"),
            finished_jobs: NamedQueue::new("finished_jobs"),
            failed_jobs: NamedQueue::new("failed_jobs"),
            completed_jobs: NamedQueue::new("completed_jobs"),
            completed_jobids: NamedQueue::new("completed_jobids"),
            messages: NamedQueue::new("messages"),
        }
    }

    /// True while a job is still waiting for, or going through, stage-in.
    pub fn staging_pending(&self) -> bool {
        !self.data_in.is_empty()
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{share, Job};

    #[tokio::test]
    async fn get_returns_items_in_fifo_order() {
        let q: NamedQueue<u32> = NamedQueue::new("test");
        q.put(1);
        q.put(2);
        assert_eq!(q.get(Duration::from_millis(10)).await, Some(1));
        assert_eq!(q.get(Duration::from_millis(10)).await, Some(2));
        assert_eq!(q.get(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn get_wakes_up_on_put() {
        let q = std::sync::Arc::new(NamedQueue::<u32>::new("test"));
        let producer = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.put(7);
        });
        assert_eq!(q.get(Duration::from_secs(5)).await, Some(7));
    }

    #[test]
    fn remove_job_by_id() {
        let q = JobQueue::new("jobs");
        q.put(share(Job::new("1")));
        q.put(share(Job::new("2")));
        assert!(q.contains_job("2"));
        let removed = q.remove_job("2").unwrap();
        assert_eq!(removed.lock().jobid, "2");
        assert_eq!(q.jobids(), vec!["1".to_string()]);
    }
}
