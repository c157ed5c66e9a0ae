//! Bounded worker pool for stream handlers.
//!
//! A fixed number of tokio tasks pull work from one bounded queue. It caps
//! how many handlers run at once; there is no scaling and no scheduling, so a
//! task that never finishes permanently occupies a worker.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Once, PoisonError};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::types::{MuxError, Result};

/// Queue capacity used when zero is requested.
pub const DEFAULT_QUEUE: usize = 256;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a worker pool. Clones submit to the same workers.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    workers: usize,
    queue: usize,
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    started: Once,
}

impl TaskPool {
    /// `workers == 0` picks twice the available parallelism, `queue == 0`
    /// picks [`DEFAULT_QUEUE`]. No worker runs before the first submit.
    pub fn new(workers: usize, queue: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(64)
        } else {
            workers
        };
        let queue = if queue == 0 { DEFAULT_QUEUE } else { queue };
        let (tx, rx) = mpsc::channel(queue);

        Self {
            inner: Arc::new(PoolInner {
                workers,
                queue,
                tx: Mutex::new(Some(tx)),
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                started: Once::new(),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.inner.queue
    }

    /// Queue `task`, waiting while the queue is full.
    ///
    /// Fails with [`MuxError::PoolClosed`] after [`close`](Self::close).
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MuxError::PoolClosed)?;

        self.inner.started.call_once(|| self.start());

        tx.send(Box::pin(task))
            .await
            .map_err(|_| MuxError::PoolClosed)
    }

    /// Stop taking new work. Tasks already queued still run.
    pub fn close(&self) {
        let tx = self
            .inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tx.is_some() {
            debug!("Task pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn start(&self) {
        debug!("Starting {} pool workers", self.inner.workers);
        for worker in 0..self.inner.workers {
            let rx = Arc::clone(&self.inner.rx);
            tokio::spawn(run_worker(worker, rx));
        }
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("workers", &self.inner.workers)
            .field("queue", &self.inner.queue)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_worker(worker: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!("Pool task panicked on worker {}: {}", worker, panic_message(&*panic));
        }
    }
    debug!("Pool worker {} stopped", worker);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
