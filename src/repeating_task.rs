//! Periodic job runner with at most one execution in flight.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::{Error, Result};

type TaskFn = dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Runs a task every `interval`, measured from the end of one run to the
/// start of the next.
///
/// Runs are spawned on the ambient tokio runtime, so `start` and
/// `execute_now` must be called from within one. Dropping the handle stops
/// scheduling; a run already in flight completes.
pub struct RepeatingTask {
    inner: Arc<Inner>,
}

struct Inner {
    task: Box<TaskFn>,
    robust: bool,
    running: AtomicBool,
    schedule: Mutex<Schedule>,
    failure: Mutex<Option<Error>>,
}

#[derive(Default)]
struct Schedule {
    started: bool,
    interval: Duration,
    timer: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// A robust task: failed runs are logged and scheduling continues.
    pub fn new<F, Fut>(task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_robustness(task, true)
    }

    /// With `robust = false` the first failed run stops the task and its
    /// error is kept for [`take_failure`](Self::take_failure).
    pub fn with_robustness<F, Fut>(task: F, robust: bool) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                task: Box::new(move || task().boxed()),
                robust,
                running: AtomicBool::new(false),
                schedule: Mutex::new(Schedule::default()),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Starts the schedule. Returns `false` if it was already started.
    pub fn start(&self, interval: Duration, immediately: bool) -> bool {
        {
            let mut schedule = self.inner.schedule.lock();
            if schedule.started {
                return false;
            }
            schedule.started = true;
            schedule.interval = interval;
            if !immediately {
                schedule.arm(&self.inner);
            }
        }

        if immediately {
            Inner::trigger(&self.inner);
        }
        true
    }

    /// Cancels the pending run. A run in flight is not interrupted.
    pub fn stop(&self) -> Result<()> {
        let mut schedule = self.inner.schedule.lock();
        if !schedule.started {
            return Err(Error::TaskState("has not started, cannot stop"));
        }
        schedule.started = false;
        schedule.disarm();
        Ok(())
    }

    /// Runs the task now instead of at the next tick. Does nothing while a
    /// run is in flight.
    pub fn execute_now(&self) -> Result<()> {
        if !self.is_started() {
            return Err(Error::TaskState("has not started, cannot execute"));
        }
        Inner::trigger(&self.inner);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.schedule.lock().started
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// The error that stopped a non-robust task, if any.
    pub fn take_failure(&self) -> Option<Error> {
        self.inner.failure.lock().take()
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        let mut schedule = self.inner.schedule.lock();
        schedule.started = false;
        schedule.disarm();
    }
}

impl Schedule {
    fn arm(&mut self, inner: &Arc<Inner>) {
        let inner = inner.clone();
        let interval = self.interval;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            Inner::trigger(&inner);
        });
        if let Some(previous) = self.timer.replace(timer) {
            previous.abort();
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Inner {
    fn trigger(inner: &Arc<Inner>) {
        tokio::spawn(Inner::run(inner.clone()));
    }

    async fn run(inner: Arc<Inner>) {
        if !inner.schedule.lock().started {
            return;
        }
        if inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.schedule.lock().disarm();

        let outcome = (inner.task)().await;
        inner.running.store(false, Ordering::Release);

        let mut schedule = inner.schedule.lock();
        match outcome {
            Ok(()) => {}
            Err(e) if inner.robust => warn!(error = %e, "repeating task run failed"),
            Err(e) => {
                error!(error = %e, "repeating task stopped after a failed run");
                *inner.failure.lock() = Some(e);
                schedule.started = false;
                return;
            }
        }

        if schedule.started {
            schedule.arm(&inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting(runs: &Arc<AtomicUsize>, work: Duration, fail: bool) -> RepeatingTask {
        let runs = runs.clone();
        RepeatingTask::with_robustness(
            move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    sleep(work).await;
                    if fail {
                        Err(Error::transport(Some(500), "boom"))
                    } else {
                        Ok(())
                    }
                }
            },
            true,
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_waits_for_the_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        assert!(task.start(ms(100), false));
        sleep(ms(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        sleep(ms(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_refused() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        assert!(task.start(ms(100), false));
        assert!(!task.start(ms(100), true));
        assert!(task.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn execute_now_during_a_run_is_a_no_op() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, ms(50), false);

        task.start(ms(1000), true);
        sleep(ms(10)).await;
        assert!(task.is_running());

        task.execute_now().unwrap();
        sleep(ms(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        sleep(ms(100)).await;
        assert!(!task.is_running());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_now_replaces_the_pending_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        task.start(ms(100), false);
        sleep(ms(30)).await;
        task.execute_now().unwrap();
        sleep(ms(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // the old timer would have fired at 100ms; the next run is due at 130ms
        sleep(ms(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        sleep(ms(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_pending_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        task.start(ms(10), false);
        task.stop().unwrap();
        sleep(ms(50)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!task.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_execute_require_a_started_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        assert!(matches!(task.stop(), Err(Error::TaskState(_))));
        assert!(matches!(task.execute_now(), Err(Error::TaskState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn robust_task_keeps_running_after_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, true);

        task.start(ms(10), true);
        sleep(ms(35)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(task.take_failure().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fragile_task_stops_on_first_failure() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = RepeatingTask::with_robustness(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::transport(None, "down")) }
            },
            false,
        );

        task.start(ms(10), true);
        sleep(ms(50)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!task.is_started());
        assert!(matches!(task.take_failure(), Some(Error::Transport { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_scheduling() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting(&runs, Duration::ZERO, false);

        task.start(ms(10), false);
        drop(task);
        sleep(ms(50)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
