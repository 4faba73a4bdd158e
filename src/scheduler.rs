//! Priority job scheduling
//!
//! A bounded worker pool backed by a priority-ordered queue. Higher
//! priority values are served first; equal priorities carry no ordering
//! guarantee. A saturated queue rejects the submission, and the caller's
//! priority is escalated by 2 per retry inside a bounded loop so a job
//! under sustained overload eventually wins arbitration or fails loudly
//! instead of recursing.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Estimation priority on every 5th frame, keeping estimation from
/// starving under a render backlog
pub const PRIORITY_ESTIMATION_BOOST: i32 = 10;
/// Baseline estimation priority
pub const PRIORITY_ESTIMATION: i32 = 1;
/// Render-submission priority
pub const PRIORITY_RENDER: i32 = 5;

/// Priority increment applied per rejected submission
pub const ESCALATION_STEP: i32 = 2;
/// Rejections tolerated before a submission fails as overload
pub const MAX_SUBMIT_RETRIES: u32 = 8;

/// Effective priority after `rejections` failed submissions
#[inline]
pub fn escalate(priority: i32, rejections: u32) -> i32 {
    priority + ESCALATION_STEP * rejections as i32
}

struct Job {
    priority: i32,
    seq: u64,
    task: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on priority; sequence only disambiguates, callers get
        // no ordering promise for equal priorities.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct JobQueue {
    heap: BinaryHeap<Job>,
    next_seq: u64,
}

struct SchedInner {
    queue: Mutex<JobQueue>,
    available: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
}

enum Enqueue {
    Accepted,
    /// Queue saturated; ownership of the task returns to the caller.
    Saturated(Box<dyn FnOnce() + Send>),
}

impl SchedInner {
    fn try_enqueue(&self, priority: i32, task: Box<dyn FnOnce() + Send>) -> Result<Enqueue> {
        let mut queue = self.queue.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::invalid_state("scheduler is shut down"));
        }
        if queue.heap.len() >= self.capacity {
            return Ok(Enqueue::Saturated(task));
        }
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Job {
            priority,
            seq,
            task,
        });
        self.available.notify_one();
        Ok(Enqueue::Accepted)
    }

    fn worker_loop(&self) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(job) = queue.heap.pop() {
                        break Some(job);
                    }
                    // Shutdown drains the queue before workers exit.
                    if self.shutdown.load(Ordering::Acquire) {
                        break None;
                    }
                    self.available.wait(&mut queue);
                }
            };
            match job {
                Some(job) => {
                    trace!(priority = job.priority, seq = job.seq, "running job");
                    (job.task)();
                }
                None => return,
            }
        }
    }
}

/// Bounded-concurrency priority executor
pub struct JobScheduler {
    inner: Arc<SchedInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Pool sized to available hardware parallelism
    pub fn new(queue_capacity: usize) -> Result<Self> {
        let workers = thread::available_parallelism().map_or(2, |n| n.get());
        Self::with_workers(queue_capacity, workers)
    }

    /// A pool with no live workers would accept jobs that never run, so a
    /// failed thread spawn fails construction.
    pub fn with_workers(queue_capacity: usize, workers: usize) -> Result<Self> {
        let inner = Arc::new(SchedInner {
            queue: Mutex::new(JobQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
            capacity: queue_capacity.max(1),
            shutdown: AtomicBool::new(false),
        });

        let spawned = (0..workers.max(1))
            .map(|i| {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("fb-worker-{i}"))
                    .spawn(move || inner.worker_loop())
            })
            .collect::<std::io::Result<Vec<_>>>();
        let handles = match spawned {
            Ok(handles) => handles,
            Err(err) => {
                // Unwind any workers that did start.
                inner.shutdown.store(true, Ordering::Release);
                inner.available.notify_all();
                return Err(err.into());
            }
        };

        debug!(workers = handles.len(), queue_capacity, "scheduler started");
        Ok(JobScheduler {
            inner,
            workers: Mutex::new(handles),
        })
    }

    /// Submit a job, escalating priority on rejection
    ///
    /// Fails with [`Error::SchedulerOverload`] once the retry ceiling is
    /// hit, which the driver treats as fatal.
    pub fn submit<F>(&self, priority: i32, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Box::new(task) as Box<dyn FnOnce() + Send>;
        for rejections in 0..=MAX_SUBMIT_RETRIES {
            let effective = escalate(priority, rejections);
            match self.inner.try_enqueue(effective, task)? {
                Enqueue::Accepted => return Ok(()),
                Enqueue::Saturated(rejected) => {
                    warn!(
                        priority = effective,
                        rejections, "queue saturated, escalating"
                    );
                    task = rejected;
                    thread::yield_now();
                }
            }
        }
        Err(Error::SchedulerOverload {
            retries: MAX_SUBMIT_RETRIES,
        })
    }

    /// Jobs queued but not yet dispatched
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().heap.len()
    }

    /// Stop accepting jobs, drain the queue, and join workers
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_all();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
