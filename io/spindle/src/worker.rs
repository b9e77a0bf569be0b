use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use mio::Waker;
use tracing::warn;

use crate::session::Next;

/// A fixed set of worker threads draining a bounded FIFO task queue.
///
/// Tasks are dispatched with a non-blocking `try_send`; a full queue hands
/// the task back to the caller instead of blocking, so the reactor can
/// close the connection and keep its latency bounded. Finished tasks are
/// returned over the completion channel together with the verdict, and the
/// waker nudges the reactor out of its poll.
pub struct WorkerPool<T: Send + 'static> {
    tx: Option<Sender<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `threads` workers processing tasks with `process`.
    pub fn new<F>(
        threads: usize,
        queue_depth: usize,
        process: F,
        done_tx: Sender<(T, Next)>,
        waker: Arc<Waker>,
    ) -> io::Result<Self>
    where
        F: Fn(&mut T) -> Next + Send + Sync + 'static,
    {
        let (tx, rx) = bounded::<T>(queue_depth);
        let process = Arc::new(process);

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = rx.clone();
            let done = done_tx.clone();
            let process = Arc::clone(&process);
            let waker = Arc::clone(&waker);

            let handle = thread::Builder::new()
                .name(format!("spindle-worker-{worker_id}"))
                .spawn(move || run_worker(rx, done, process, waker))?;
            handles.push(handle);
        }

        Ok(WorkerPool {
            tx: Some(tx),
            handles,
        })
    }

    /// Enqueue a task for exactly one worker and signal it.
    ///
    /// A full (or already shut down) queue returns the task to the caller.
    pub fn dispatch(&self, task: T) -> Result<(), T> {
        let tx = match self.tx.as_ref() {
            Some(tx) => tx,
            None => return Err(task),
        };
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => Err(task),
        }
    }

    /// Number of tasks currently waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    /// Stop accepting tasks, let the workers drain the queue, and join them.
    pub fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T, F>(rx: Receiver<T>, done: Sender<(T, Next)>, process: Arc<F>, waker: Arc<Waker>)
where
    T: Send + 'static,
    F: Fn(&mut T) -> Next + Send + Sync + 'static,
{
    // recv keeps returning queued tasks after the sender is dropped, so
    // shutdown drains in-flight work before the thread exits.
    while let Ok(mut task) = rx.recv() {
        let next = process(&mut task);
        if done.send((task, next)).is_err() {
            break;
        }
        let _ = waker.wake();
    }
}
