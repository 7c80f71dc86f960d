//! Fits executed on a dedicated worker thread.
//!
//! A [`FitTask`] starts its work in [`FitTask::spawn`] and hands the value
//! back through a single-slot channel. Joining with a budget abandons the
//! worker on expiry: the thread is detached and whatever it eventually
//! produces is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::error::{FpError, FpResult};

type Outcome<T> = thread::Result<FpResult<T>>;

/// Handle to a fit running on its own thread.
pub struct FitTask<T> {
    name: String,
    receiver: Receiver<Outcome<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for FitTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitTask")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> FitTask<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl<T: Send + 'static> FitTask<T> {
    /// Start `work` on a new named thread.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> FpResult<Self>
    where
        F: FnOnce() -> FpResult<T> + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = bounded::<Outcome<T>>(1);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work));
                // The receiver is gone when the task was abandoned.
                let _ = sender.send(outcome);
            })
            .map_err(|e| FpError::TaskSpawn {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(task = %name, "fit task started");
        Ok(Self {
            name,
            receiver,
            handle: Some(handle),
        })
    }

    fn unpack(&self, outcome: Outcome<T>) -> FpResult<T> {
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(task = %self.name, "fit task panicked");
                Err(FpError::TaskPanicked(self.name.clone()))
            }
        }
    }

    /// Wait for the result.
    pub fn join(mut self) -> FpResult<T> {
        let outcome = self.receiver.recv();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        match outcome {
            Ok(outcome) => self.unpack(outcome),
            Err(_) => Err(FpError::TaskPanicked(self.name.clone())),
        }
    }

    /// Wait at most `budget`; on expiry the task is abandoned.
    pub fn join_timeout(mut self, budget: Duration) -> FpResult<T> {
        match self.receiver.recv_timeout(budget) {
            Ok(outcome) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                self.unpack(outcome)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(task = %self.name, ?budget, "fit task abandoned after budget");
                Err(FpError::TaskTimedOut(self.name.clone()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(FpError::TaskPanicked(self.name.clone()))
            }
        }
    }

    /// Wait with an optional budget.
    pub fn join_within(self, budget: Option<Duration>) -> FpResult<T> {
        match budget {
            Some(b) => self.join_timeout(b),
            None => self.join(),
        }
    }
}
