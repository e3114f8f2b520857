//! Single-thread FIFO task runner used by asynchronous filters.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::mpsc,
    thread::{self, JoinHandle, ThreadId},
};

use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised when handing work to the worker.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch worker is not running")]
    NotRunning,
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(#[from] io::Error),
    /// The task was dropped before producing a result (it panicked).
    #[error("dispatch task did not complete")]
    Abandoned,
}

/// Lifecycle of an [`AsyncDispatchWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Running,
    Stopped,
}

/// Runs submitted closures one at a time, in submission order, on a named thread.
///
/// # Example
/// ```rust
/// use vfx::dispatch::AsyncDispatchWorker;
///
/// let mut worker = AsyncDispatchWorker::new("doc-worker");
/// worker.start().unwrap();
/// let answer = worker.run_blocking(|| 6 * 7).unwrap();
/// assert_eq!(answer, 42);
/// worker.stop();
/// assert!(worker.submit(|| ()).is_err());
/// ```
pub struct AsyncDispatchWorker {
    name: String,
    state: WorkerState,
    tx: Option<mpsc::Sender<Task>>,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl AsyncDispatchWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::Uninitialized,
            tx: None,
            thread: None,
            thread_id: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    /// Whether the caller is the worker thread itself.
    pub fn is_worker_thread(&self) -> bool {
        self.thread_id == Some(thread::current().id())
    }

    /// Spawn the worker thread. No-op when already running; a stopped worker starts afresh.
    pub fn start(&mut self) -> Result<(), DispatchError> {
        if self.is_running() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel::<Task>();
        let name = self.name.clone();
        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            for task in rx {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!(worker = %name, "dispatch task panicked");
                }
            }
            debug!(worker = %name, "dispatch queue drained");
        })?;
        self.thread_id = Some(handle.thread().id());
        self.thread = Some(handle);
        self.tx = Some(tx);
        self.state = WorkerState::Running;
        debug!(worker = %self.name, "dispatch worker started");
        Ok(())
    }

    /// Queue `task` behind everything already submitted.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let tx = self.tx.as_ref().ok_or(DispatchError::NotRunning)?;
        tx.send(Box::new(task))
            .map_err(|_| DispatchError::NotRunning)
    }

    /// Queue `task` and wait for its result.
    ///
    /// Called from the worker thread, the task runs inline instead of deadlocking on itself.
    pub fn run_blocking<T: Send + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T, DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::NotRunning);
        }
        if self.is_worker_thread() {
            return Ok(task());
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.submit(move || {
            let _ = reply_tx.send(task());
        })?;
        reply_rx.recv().map_err(|_| DispatchError::Abandoned)
    }

    /// Close the queue and wait for already-queued tasks to finish.
    ///
    /// Idempotent. When called from the worker thread itself the thread is left to finish on its
    /// own instead of being joined.
    pub fn stop(&mut self) {
        if self.state != WorkerState::Running {
            return;
        }
        self.tx = None;
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                debug!(worker = %self.name, "stop requested from worker thread; not joining");
            } else if handle.join().is_err() {
                warn!(worker = %self.name, "dispatch worker exited with a panic");
            }
        }
        self.thread_id = None;
        self.state = WorkerState::Stopped;
        debug!(worker = %self.name, "dispatch worker stopped");
    }
}

impl Drop for AsyncDispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    #[test]
    fn runs_tasks_in_order_and_drains_on_stop() {
        let mut worker = AsyncDispatchWorker::new("order-test");
        worker.start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            worker
                .submit(move || {
                    if i == 0 {
                        thread::sleep(Duration::from_millis(20));
                    }
                    seen.lock().unwrap().push(i);
                })
                .unwrap();
        }
        worker.stop();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn restarts_after_stop() {
        let mut worker = AsyncDispatchWorker::new("restart-test");
        assert!(matches!(
            worker.run_blocking(|| 1),
            Err(DispatchError::NotRunning)
        ));
        worker.start().unwrap();
        worker.stop();
        worker.stop();
        worker.start().unwrap();
        let name = worker
            .run_blocking(|| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("restart-test"));
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let mut worker = AsyncDispatchWorker::new("panic-test");
        worker.start().unwrap();
        assert!(matches!(
            worker.run_blocking(|| -> u32 { panic!("boom") }),
            Err(DispatchError::Abandoned)
        ));
        assert_eq!(worker.run_blocking(|| 3).unwrap(), 3);
    }
}
