//! Streaming threads.

use crate::error::Result;
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace};

/// A thread that calls a function in a loop until stopped.
///
/// Stopping only raises a flag; whatever the loop body is blocked on must be
/// unblocked separately (elements flush their pads for that). [`Task::join`]
/// is a no-op on the task's own thread, so a task may stop itself.
#[derive(Debug)]
pub struct Task {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Create a stopped task.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start the loop on a new thread.
    ///
    /// The loop ends when `body` breaks or [`Task::stop`] was called.
    /// Starting a running task does nothing.
    pub fn start<F>(&self, mut body: F) -> Result<()>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        if let Some(old) = handle.take() {
            let _ = old.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        let stop = self.stop.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            trace!(task = %name, "task started");
            while !stop.load(Ordering::SeqCst) {
                if body().is_break() {
                    break;
                }
            }
            trace!(task = %name, "task finished");
        })?;
        *handle = Some(spawned);
        debug!(task = %self.name, "started task");
        Ok(())
    }

    /// Ask the loop to end after the current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether stop was requested.
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Whether the thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.handle.lock().as_ref().map(|h| h.thread().id())
    }

    /// Stop and wait for the thread to exit.
    pub fn join(&self) {
        self.stop();
        self.wait();
    }

    /// Wait for the loop to end on its own, without asking it to stop.
    pub fn wait(&self) {
        if self.thread_id() == Some(thread::current().id()) {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!(task = %self.name, "joined task");
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_loop_runs_until_break() {
        let task = Task::new("count");
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        task.start(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 9 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();
        task.wait();
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(!task.is_running());
    }

    #[test]
    fn test_stop_ends_loop() {
        let task = Task::new("spin");
        task.start(|| {
            thread::sleep(Duration::from_millis(1));
            ControlFlow::Continue(())
        })
        .unwrap();
        assert!(task.is_running());
        task.join();
        assert!(!task.is_running());
    }
}
