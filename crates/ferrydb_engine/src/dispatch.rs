//! Asynchronous change-notification dispatch.
//!
//! A single notifier thread drains a FIFO queue of delivery jobs. Commits
//! enqueue; the thread invokes listener callbacks off the committing
//! thread while preserving commit order. A removed listener is checked at
//! invoke time, so unregistration suppresses every delivery that has not
//! yet started.

use parking_lot::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct Dispatcher {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a delivery job. Silently dropped after shutdown.
    pub fn enqueue(&self, job: Job) {
        if let Some(sender) = &*self.sender.lock() {
            let _ = sender.send(job);
        }
    }

    /// Drains the queue and joins the notifier thread.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for(count: &Arc<AtomicUsize>, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < expected {
            assert!(Instant::now() < deadline, "dispatch timed out");
            thread::yield_now();
        }
    }

    #[test]
    fn jobs_run_off_thread_in_order() {
        let dispatcher = Dispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let log = Arc::clone(&log);
            let count = Arc::clone(&count);
            dispatcher.enqueue(Box::new(move || {
                log.lock().push(i);
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        wait_for(&count, 10);
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_drains_pending_jobs() {
        let dispatcher = Dispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let count = Arc::clone(&count);
            dispatcher.enqueue(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        dispatcher.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn enqueue_after_shutdown_is_dropped() {
        let dispatcher = Dispatcher::new();
        dispatcher.shutdown();

        let count = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&count);
        dispatcher.enqueue(Box::new(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
