//! Periodic task scheduler with prescaled sub-callbacks.
//!
//! Every registered task ticks on its own timer. The primary callback runs
//! on every tick, a prescaled callback with count `n` runs on ticks
//! `n, 2n, 3n, ...`. The first tick happens one period after [`Scheduler::start`].
//!
//! ```text
//!   tick:        1   2   3   4   5   6   7 ...
//!   primary:     x   x   x   x   x   x   x
//!   every 3rd:           x           x
//! ```
//!
//! A panicking callback is logged and the task keeps ticking.
//! [`Scheduler::stop_all`] cancels every task; an in-flight callback is
//! dropped at its next await point.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strum::Display;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Async callback run by a task.
pub type TaskCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure into a [`TaskCallback`].
pub fn callback<F, Fut>(f: F) -> TaskCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TaskState {
    Stopped,
    Running,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("unknown task {0:?}")]
    UnknownTask(TaskId),

    #[error("task period must be positive")]
    ZeroPeriod,

    #[error("prescale count must be positive")]
    ZeroPrescale,

    #[error("tasks cannot change while the scheduler runs")]
    Running,
}

struct Task {
    name: String,
    period: Duration,
    primary: TaskCallback,
    prescaled: Vec<(u64, TaskCallback)>,
    ticks: Arc<AtomicU64>,
}

pub struct Scheduler {
    tasks: Vec<Task>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    state: TaskState,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: TaskState::Stopped,
        }
    }

    pub fn register_task(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        primary: TaskCallback,
    ) -> Result<TaskId, SchedulerError> {
        self.ensure_stopped()?;
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        let name = name.into();
        debug!("[Scheduler] Registered task '{}' every {:?}", name, period);
        self.tasks.push(Task {
            name,
            period,
            primary,
            prescaled: Vec::new(),
            ticks: Arc::new(AtomicU64::new(0)),
        });
        Ok(TaskId(self.tasks.len() - 1))
    }

    /// Run `callback` on every `every`-th tick of `task`.
    pub fn add_prescaled(
        &mut self,
        task: TaskId,
        every: u64,
        callback: TaskCallback,
    ) -> Result<(), SchedulerError> {
        self.ensure_stopped()?;
        if every == 0 {
            return Err(SchedulerError::ZeroPrescale);
        }
        let entry = self
            .tasks
            .get_mut(task.0)
            .ok_or(SchedulerError::UnknownTask(task))?;
        entry.prescaled.push((every, callback));
        Ok(())
    }

    /// Spawn every registered task. Must be called inside a tokio runtime.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        self.ensure_stopped()?;
        // A token cancelled by an earlier stop cannot be reused.
        self.cancel = CancellationToken::new();
        self.tracker = TaskTracker::new();

        for task in &self.tasks {
            task.ticks.store(0, Ordering::SeqCst);
            let name = task.name.clone();
            let period = task.period;
            let primary = task.primary.clone();
            let prescaled = task.prescaled.clone();
            let ticks = task.ticks.clone();
            let cancel = self.cancel.clone();

            self.tracker.spawn(async move {
                info!("[Scheduler] Task '{}' started", name);
                let mut timer = interval_at(Instant::now() + period, period);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = timer.tick() => {}
                    }
                    let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                    let run = async {
                        run_guarded(&name, "primary", &primary).await;
                        for (every, callback) in &prescaled {
                            if tick % every == 0 {
                                run_guarded(&name, "prescaled", callback).await;
                            }
                        }
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = run => {}
                    }
                }
                info!("[Scheduler] Task '{}' stopped", name);
            });
        }
        self.tracker.close();
        self.state = TaskState::Running;
        Ok(())
    }

    /// Cancel all tasks and wait for them to finish. Safe to call when
    /// nothing was started.
    pub async fn stop_all(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if self.state == TaskState::Running {
            info!("[Scheduler] All tasks stopped");
        }
        self.state = TaskState::Stopped;
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Ticks counted by `task` since the last start.
    pub fn ticks(&self, task: TaskId) -> Option<u64> {
        self.tasks
            .get(task.0)
            .map(|t| t.ticks.load(Ordering::SeqCst))
    }

    fn ensure_stopped(&self) -> Result<(), SchedulerError> {
        match self.state {
            TaskState::Stopped => Ok(()),
            TaskState::Running => Err(SchedulerError::Running),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_guarded(task: &str, kind: &str, callback: &TaskCallback) {
    // Building the future may panic as well as polling it.
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
        Ok(future) => future,
        Err(_) => {
            error!("[Scheduler] Task '{}' {} callback panicked", task, kind);
            return;
        }
    };
    if AssertUnwindSafe(future).catch_unwind().await.is_err() {
        error!("[Scheduler] Task '{}' {} callback panicked", task, kind);
    }
}
