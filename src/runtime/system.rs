//! Scheduler lanes for the async runtime

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::future::{Future, Promise};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A system for managing asynchronous work across two lanes.
///
/// The worker lane is a pool of dedicated threads and is the only place
/// CPU-bound decoding runs. The main lane is cooperative: tasks queued to it
/// execute only when the embedding application calls [`AsyncSystem::pump`],
/// typically once per frame. Instances are cheap to clone and share.
#[derive(Clone)]
pub struct AsyncSystem {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    // None when the pool has zero threads; jobs then run on the caller.
    worker_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    main_tx: Sender<Job>,
    main_rx: Receiver<Job>,
}

impl AsyncSystem {
    /// Create a system with `worker_threads` pool threads.
    ///
    /// With zero threads, worker-lane jobs execute synchronously on the
    /// thread that schedules them; main-lane behaviour is unchanged.
    pub fn new(worker_threads: usize) -> Self {
        let (main_tx, main_rx) = crossbeam_channel::unbounded::<Job>();

        let (worker_tx, workers) = if worker_threads == 0 {
            (None, Vec::new())
        } else {
            let (tx, rx) = crossbeam_channel::unbounded::<Job>();
            let workers = (0..worker_threads)
                .map(|i| {
                    let rx = rx.clone();
                    std::thread::Builder::new()
                        .name(format!("terrastream-worker-{}", i))
                        .spawn(move || {
                            for job in rx.iter() {
                                job();
                            }
                        })
                        .expect("failed to spawn worker thread")
                })
                .collect();
            (Some(tx), workers)
        };

        Self {
            inner: Arc::new(SystemInner {
                worker_tx,
                workers,
                main_tx,
                main_rx,
            }),
        }
    }

    /// Run all tasks currently queued for the main lane, on the calling
    /// thread, in the order they were queued. Tasks enqueued while pumping
    /// run in the same pass.
    pub fn pump(&self) {
        while let Ok(job) = self.inner.main_rx.try_recv() {
            job();
        }
    }

    pub(crate) fn spawn_worker_job(&self, job: Job) {
        match &self.inner.worker_tx {
            Some(tx) => {
                // The pool only shuts down when the last system handle drops,
                // and we hold one; send cannot fail here.
                let _ = tx.send(job);
            }
            None => job(),
        }
    }

    pub(crate) fn enqueue_main_job(&self, job: Job) {
        let _ = self.inner.main_tx.send(job);
    }

    /// Run a function on the worker pool, returning a future that resolves
    /// with its result.
    pub fn run_in_worker<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (future, promise) = Future::pending(self);
        self.spawn_worker_job(Box::new(move || promise.resolve(f())));
        future
    }

    /// Queue a function for the main lane, returning a future that resolves
    /// with its result during a later [`AsyncSystem::pump`].
    pub fn run_in_main<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (future, promise) = Future::pending(self);
        self.enqueue_main_job(Box::new(move || promise.resolve(f())));
        future
    }

    /// Create a future that is already resolved.
    pub fn resolved<T: Send + 'static>(&self, value: T) -> Future<T> {
        let (future, promise) = Future::pending(self);
        promise.resolve(value);
        future
    }

    /// Create a future resolved externally through the supplied promise.
    pub fn create_future<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce(Promise<T>),
    {
        let (future, promise) = Future::pending(self);
        f(promise);
        future
    }
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        // Closing the channel ends the worker loops.
        self.worker_tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
