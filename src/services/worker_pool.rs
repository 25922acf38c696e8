//! Fixed-size background worker pool
//!
//! Jobs are queued on an unbounded channel and picked up by whichever worker
//! is free. Each job's output goes to a caller-supplied handler; a failing
//! job or a panicking handler is logged and the worker moves on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::error::Result;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Tracks queued and running jobs so that callers can wait for idleness
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `num_workers` workers on the current tokio runtime
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(Pending::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..num_workers.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let pending = pending.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { run_worker(id, receiver, pending, shutdown).await })
            })
            .collect();

        info!("Started worker pool with {} workers", num_workers.max(1));

        Self {
            sender,
            workers,
            pending,
            shutdown_tx,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Queue `job`; its output is passed to `handler` on success
    pub fn put<F, T, H>(&self, job: F, handler: H)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        H: FnOnce(T) + Send + 'static,
    {
        let task: Job = Box::pin(async move {
            match job.await {
                Ok(value) => handler(value),
                Err(e) => error!("{}", e),
            }
        });

        self.pending.add();
        if self.sender.send(task).is_err() {
            error!("Worker pool is shut down, dropping job");
            self.pending.done();
        }
    }

    /// Queue one job per item, all sharing the same handler
    pub fn map<I, F, T, H>(&self, jobs: I, handler: H)
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        H: Fn(T) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for job in jobs {
            let handler = handler.clone();
            self.put(job, move |value| handler(value));
        }
    }

    /// Wait until every queued job has finished
    pub async fn wait(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop the workers; queued jobs that have not started are dropped
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("Worker pool stopped");
    }
}

#[instrument(skip(receiver, pending, shutdown))]
async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<Pending>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            job = async { receiver.lock().await.recv().await } => job,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Worker {} shutting down", id);
                    break;
                }
                continue;
            }
        };

        let Some(job) = job else {
            break;
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("Worker {} job panicked", id);
        }
        pending.done();
    }
}
