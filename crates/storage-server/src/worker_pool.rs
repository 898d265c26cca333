//! Fixed-size worker pool with a bounded pending-task queue, the Rust
//! shape of the original server's `threadpool_create`/`threadpool_add`:
//! a task submitted when every worker is busy and the queue is full is
//! rejected immediately rather than blocking the dispatcher.
//!
//! None of the teacher's async spawners (`anyspawn`, `arty`, `wing`) fit
//! here — this pool runs blocking I/O on plain OS threads by design, not
//! cooperative tasks on an executor, so it is grounded directly in the
//! original's `threadpool.h` contract instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<std::collections::VecDeque<Job>>,
    not_empty: Condvar,
    capacity: usize,
    exiting: AtomicBool,
}

/// A running pool of `numthreads` workers draining a queue bounded at
/// `queue_size` pending jobs.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Returned by [`WorkerPool::try_submit`] when every worker is busy and the
/// pending queue is already at `queue_size`; the caller is expected to serve
/// the request inline with `TEMPORARILY_UNAVAILABLE`, mirroring
/// `threadpool_add`'s return value of `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturated;

impl WorkerPool {
    pub fn new(numthreads: usize, queue_size: usize) -> Self {
        assert!(numthreads > 0, "a worker pool needs at least one thread");
        let shared = Arc::new(Shared {
            queue: Mutex::new(std::collections::VecDeque::new()),
            not_empty: Condvar::new(),
            capacity: queue_size,
            exiting: AtomicBool::new(false),
        });

        let workers = (0..numthreads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("storage-worker-{id}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueues `job` if a slot is free, returning [`Saturated`] otherwise.
    /// Never blocks: this is called from the dispatcher's poll loop, which
    /// must stay responsive to every other connection.
    pub fn try_submit<F>(&self, job: F) -> Result<(), Saturated>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            return Err(Saturated);
        }
        queue.push_back(Box::new(job) as Job);
        self.shared.not_empty.notify_one();
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.exiting.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let mut queue = shared.queue.lock();
        loop {
            if let Some(job) = queue.pop_front() {
                drop(queue);
                job();
                break;
            }
            if shared.exiting.load(Ordering::SeqCst) {
                return;
            }
            shared.not_empty.wait(&mut queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new(2, 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.try_submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn rejects_when_saturated() {
        let pool = WorkerPool::new(1, 1);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let rx_for_job = Arc::clone(&release_rx);
        pool.try_submit(move || {
            let _ = rx_for_job.lock().recv();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pool.try_submit(|| {}).unwrap();
        assert_eq!(pool.try_submit(|| {}), Err(Saturated));

        release_tx.send(()).unwrap();
    }
}
