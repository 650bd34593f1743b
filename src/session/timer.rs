//! Shared scheduler for heartbeat and timeout tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Schedules one-shot tasks on the current tokio runtime.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    scheduled: Arc<AtomicU64>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless the returned handle is cancelled first.
    ///
    /// Once the delay elapses the task runs detached, so cancelling from
    /// inside the task itself does not interrupt it.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.scheduled.fetch_add(1, Ordering::Relaxed) + 1;
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);

        let delay_task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fired_flag.store(true, Ordering::SeqCst);
            trace!(timer_id = id, "Timer fired");
            tokio::spawn(task);
        });

        TimerHandle {
            id,
            delay_task,
            fired,
        }
    }

    /// Total number of timers scheduled through this service
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }
}

/// Cancellable handle to a scheduled task
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    delay_task: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the timer. A no-op once it has fired.
    pub fn cancel(&self) {
        if !self.fired.load(Ordering::SeqCst) {
            trace!(timer_id = self.id, "Timer cancelled");
        }
        self.delay_task.abort();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
