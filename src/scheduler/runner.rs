//! Priority-aware periodic task runner.
//!
//! [`TaskRunner`] keeps registered tasks in a deadline-ordered queue and
//! dispatches them one at a time from a single loop. Ties on the deadline go
//! to the lower priority value. Repeating tasks are rescheduled from the
//! moment they are dispatched, so a loop that falls behind drifts forward
//! instead of firing a burst of catch-up runs.

use super::task::{Task, TaskStatus};
use crate::sink::ResultSink;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sleep between queue checks when nothing is due.
const DEFAULT_IDLE_WAIT_MS: u64 = 100;

/// How long `shutdown` waits for the loop to drain before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A queued dispatch of one task.
struct ScheduledEntry<P> {
    /// When this entry becomes due.
    next_run: Instant,
    /// Registration generation; entries whose generation no longer matches
    /// the task's current one are superseded and dropped on pop.
    generation: u64,
    /// The task to dispatch.
    task: Task<P>,
}

impl<P> PartialEq for ScheduledEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P> Eq for ScheduledEntry<P> {}

impl<P> PartialOrd for ScheduledEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for ScheduledEntry<P> {
    // BinaryHeap is a max-heap; the comparison is reversed so the earliest
    // deadline (then the lowest priority value) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_run
            .cmp(&self.next_run)
            .then_with(|| other.task.priority.cmp(&self.task.priority))
    }
}

/// Fields guarded by the runner mutex.
struct RunnerState<P> {
    /// Pending dispatches, earliest deadline first.
    queue: BinaryHeap<ScheduledEntry<P>>,
    /// Current generation per task name. Re-registration bumps this, which
    /// lazily invalidates the superseded queue entry.
    generations: HashMap<String, u64>,
    /// Counter backing the generation stamps.
    next_generation: u64,
    /// Wall-clock time of each task's most recent dispatch.
    last_run: HashMap<String, DateTime<Utc>>,
}

/// Single-loop scheduler for named periodic tasks.
///
/// Cloning is cheap and shares the queue: register from anywhere, run the
/// loop once via [`spawn`](Self::spawn).
pub struct TaskRunner<P> {
    /// Queue and bookkeeping, shared across clones.
    state: Arc<Mutex<RunnerState<P>>>,
    /// Where successful task results go.
    sink: Option<Arc<dyn ResultSink<P>>>,
    /// Signals the run loop to stop.
    cancel: CancellationToken,
    /// How long the loop sleeps when nothing is due.
    idle_wait: Duration,
}

impl<P> TaskRunner<P> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RunnerState {
                queue: BinaryHeap::new(),
                generations: HashMap::new(),
                next_generation: 0,
                last_run: HashMap::new(),
            })),
            sink: None,
            cancel: CancellationToken::new(),
            idle_wait: Duration::from_millis(DEFAULT_IDLE_WAIT_MS),
        }
    }

    /// Publish task results to `sink`. Without one, results are dropped with
    /// a debug log.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink<P>>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the idle wait between queue checks.
    #[must_use]
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    /// Register a task, scheduling its first dispatch after the task's
    /// initial delay.
    ///
    /// Registering a name that already exists replaces the earlier task; the
    /// superseded queue entry never dispatches.
    pub fn register(&self, task: Task<P>) {
        let mut state = self.lock_state();
        let generation = state.next_generation;
        state.next_generation += 1;
        if state
            .generations
            .insert(task.name.clone(), generation)
            .is_some()
        {
            debug!("replacing registered task '{}'", task.name);
        }
        debug!(
            "task '{}' scheduled ({}, first run in {}s)",
            task.name,
            task.interval,
            task.initial_delay.as_secs()
        );
        state.queue.push(ScheduledEntry {
            next_run: Instant::now() + task.initial_delay,
            generation,
            task,
        });
    }

    /// Snapshot the live queue, soonest dispatch first.
    pub fn status(&self) -> Vec<TaskStatus> {
        let state = self.lock_state();
        let now = Instant::now();
        let wall_now = Utc::now();

        let mut rows: Vec<(Duration, TaskStatus)> = state
            .queue
            .iter()
            .filter(|entry| {
                state.generations.get(&entry.task.name).copied() == Some(entry.generation)
            })
            .map(|entry| {
                let until = entry.next_run.saturating_duration_since(now);
                let next_run = wall_now
                    + chrono::Duration::from_std(until)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                let status = TaskStatus {
                    name: entry.task.name.clone(),
                    interval: entry.task.interval,
                    priority: entry.task.priority,
                    last_run: state.last_run.get(&entry.task.name).copied(),
                    next_run,
                    seconds_until_next_run: until.as_secs(),
                };
                (until, status)
            })
            .collect();

        rows.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.priority.cmp(&b.1.priority))
                .then_with(|| a.1.name.cmp(&b.1.name))
        });
        rows.into_iter().map(|(_, status)| status).collect()
    }

    /// Stop the run loop at its next check.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the loop and wait for it to finish, aborting after a grace
    /// period.
    pub async fn shutdown(&self, mut handle: JoinHandle<()>) {
        self.cancel.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("task runner terminated abnormally: {e}"),
            Err(_) => {
                warn!("task runner did not stop within the grace period; aborting");
                handle.abort();
            }
        }
    }

    /// Pop the next due task, rescheduling or retiring it.
    ///
    /// Returns `None` when nothing is due yet. Repeating tasks go back on
    /// the queue at now-plus-period before their action runs, so the next
    /// deadline is measured from this dispatch rather than the original due
    /// time.
    fn pop_due(&self) -> Option<Task<P>> {
        let mut state = self.lock_state();
        let now = Instant::now();

        loop {
            match state.queue.peek() {
                Some(entry) if entry.next_run <= now => {}
                _ => return None,
            }
            let entry = state.queue.pop()?;

            if state.generations.get(&entry.task.name).copied() != Some(entry.generation) {
                debug!("dropping superseded queue entry for '{}'", entry.task.name);
                continue;
            }

            match entry.task.interval.period() {
                Some(period) => {
                    state.queue.push(ScheduledEntry {
                        next_run: now + period,
                        generation: entry.generation,
                        task: entry.task.clone(),
                    });
                }
                None => {
                    state.generations.remove(&entry.task.name);
                }
            }
            state.last_run.insert(entry.task.name.clone(), Utc::now());
            return Some(entry.task);
        }
    }

    /// Run one task's action and route its result.
    async fn dispatch(&self, task: Task<P>) {
        debug!("dispatching scheduled task '{}'", task.name);
        match (task.action)().await {
            Ok(Some(payload)) => match &self.sink {
                Some(sink) => sink.publish(&task.name, payload),
                None => debug!("no sink attached, dropping result from '{}'", task.name),
            },
            Ok(None) => {}
            Err(e) => error!("scheduled task '{}' failed: {e}", task.name),
        }
    }

    /// The runner loop: dispatch everything due, then idle until the next
    /// check or cancellation.
    async fn run(self) {
        info!("task runner started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.pop_due() {
                Some(task) => self.dispatch(task).await,
                None => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.idle_wait) => {}
                    }
                }
            }
        }
        info!("task runner stopped");
    }

    /// Lock the runner state, recovering from poisoning.
    fn lock_state(&self) -> MutexGuard<'_, RunnerState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> TaskRunner<P>
where
    P: Send + 'static,
{
    /// Start the runner loop on the current runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(runner.run())
    }
}

impl<P> Default for TaskRunner<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Clone for TaskRunner<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
            cancel: self.cancel.clone(),
            idle_wait: self.idle_wait,
        }
    }
}
