//! Bounded-parallel work queue with a shared deadline
//!
//! A [`ParallelQueue`] runs submitted futures as tokio tasks, admitting at
//! most `limit` of them at a time. Every queue created for one request shares
//! the same [`Timeout`], so nested queues (per request, then per series) all
//! give up at the same instant.
//!
//! ```text
//!   submit() ──▶ spawn ──▶ [ticket or deadline] ──▶ [work or deadline] ──▶ finish()
//!                                                                           │
//!   wait() ◀── watch<Progress{pending, error}> ◀───────────────────────────┘
//! ```
//!
//! The first error returned by any unit of work is latched; later errors are
//! dropped. `wait()` returns as soon as all work is done, an error is
//! latched, or the deadline passes. On error, outstanding work is aborted.
//! Dropping an unfinished `wait()` future aborts outstanding work as well,
//! so cancelling an outer task cascades into the queues it was waiting on.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

// ============================================================================
// Timeout
// ============================================================================

/// A deadline shared by every queue and request of one fetch
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
    deadline: Instant,
}

impl Timeout {
    /// Deadline `duration` from now
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: Instant::now() + duration,
        }
    }

    /// Configured duration, as reported in timeout errors
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Instant at which the timeout fires
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once the deadline has passed
    pub fn has_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Resolves when the deadline passes
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await
    }

    /// The error reported when this timeout fires
    pub fn error(&self) -> Error {
        Error::FetchTimeout(self.duration)
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Progress {
    pending: usize,
    error: Option<Error>,
}

struct QueueInner<S> {
    tickets: Semaphore,
    timeout: Timeout,
    state: Mutex<S>,
    progress: watch::Sender<Progress>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl<S> QueueInner<S> {
    fn finish(&self, result: Result<()>) {
        self.progress.send_modify(move |p| {
            p.pending = p.pending.saturating_sub(1);
            if let Err(e) = result {
                if p.error.is_none() {
                    p.error = Some(e);
                }
            }
        });
    }

    fn abort_all(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty() {
            debug!(tasks = tasks.len(), "Aborting outstanding queue work");
        }
        for task in tasks {
            task.abort();
        }
    }
}

/// Bounded-parallel queue with first-error latching
///
/// `S` is shared state guarded by the queue's mutex; work items reach it
/// through [`ParallelQueue::state`].
///
/// # Example
///
/// ```rust
/// use kuba_rollup::fetch::parallel::{ParallelQueue, Timeout};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kuba_rollup::Result<()> {
/// let queue: ParallelQueue<Vec<u32>> = ParallelQueue::new(2, Timeout::new(Duration::from_secs(1)));
/// for i in 0..4 {
///     let q = queue.clone();
///     queue.submit(move || async move {
///         q.state().lock().push(i);
///         Ok(())
///     });
/// }
/// queue.wait().await?;
/// assert_eq!(queue.take_state().len(), 4);
/// # Ok(())
/// # }
/// ```
pub struct ParallelQueue<S = ()> {
    inner: Arc<QueueInner<S>>,
}

impl<S> Clone for ParallelQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Default + Send + 'static> ParallelQueue<S> {
    /// Create a queue admitting `limit` concurrent units of work
    pub fn new(limit: usize, timeout: Timeout) -> Self {
        Self::with_state(limit, timeout, S::default())
    }

    /// Take the shared state, leaving the default in its place
    pub fn take_state(&self) -> S {
        std::mem::take(&mut *self.inner.state.lock())
    }
}

impl<S: Send + 'static> ParallelQueue<S> {
    /// Create a queue with initial shared state
    pub fn with_state(limit: usize, timeout: Timeout, state: S) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            inner: Arc::new(QueueInner {
                tickets: Semaphore::new(limit.max(1)),
                timeout,
                state: Mutex::new(state),
                progress,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Mutex guarding the shared state
    pub fn state(&self) -> &Mutex<S> {
        &self.inner.state
    }

    /// Deadline shared by this queue
    pub fn timeout(&self) -> Timeout {
        self.inner.timeout
    }

    /// Enqueue a unit of work
    ///
    /// The work starts once a ticket is free. If the deadline passes first,
    /// the work never runs and the queue latches a timeout error.
    pub fn submit<F, Fut>(&self, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner.progress.send_modify(|p| p.pending += 1);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = inner.timeout.expired() => Err(inner.timeout.error()),
                permit = inner.tickets.acquire() => match permit {
                    Ok(_ticket) => tokio::select! {
                        biased;
                        _ = inner.timeout.expired() => Err(inner.timeout.error()),
                        result = work() => result,
                    },
                    Err(_) => Err(Error::Internal("parallel queue tickets closed".to_string())),
                },
            };
            inner.finish(result);
        });

        self.inner.tasks.lock().push(handle.abort_handle());
    }

    /// Wait for all work, the first error, or the deadline
    pub async fn wait(&self) -> Result<()> {
        let mut guard = AbortOnDrop {
            inner: self.inner.as_ref(),
            armed: true,
        };

        let mut rx = self.inner.progress.subscribe();
        let settled = async {
            match rx.wait_for(|p| p.pending == 0 || p.error.is_some()).await {
                Ok(progress) => progress.error.clone(),
                Err(_) => Some(Error::Internal("parallel queue closed".to_string())),
            }
        };

        let outcome = tokio::select! {
            biased;
            error = settled => error,
            _ = self.inner.timeout.expired() => Some(self.inner.timeout.error()),
        };

        match outcome {
            None => {
                guard.armed = false;
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}

struct AbortOnDrop<'a, S> {
    inner: &'a QueueInner<S>,
    armed: bool,
}

impl<S> Drop for AbortOnDrop<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abort_all();
        }
    }
}
