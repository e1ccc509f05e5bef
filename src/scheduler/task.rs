//! Task definitions for the periodic runner.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Priority assigned to tasks that do not set one. Lower values dispatch
/// first when deadlines tie.
const DEFAULT_PRIORITY: u32 = 0;

/// How often a task should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskInterval {
    /// Run repeatedly, `secs` seconds between dispatches.
    Every { secs: u64 },
    /// Run a single time, then retire.
    Once,
}

impl TaskInterval {
    /// The repeat period, or `None` for one-shot tasks.
    pub fn period(&self) -> Option<Duration> {
        match *self {
            Self::Every { secs } => Some(Duration::from_secs(secs)),
            Self::Once => None,
        }
    }
}

impl fmt::Display for TaskInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Every { secs } if secs >= 3600 && secs % 3600 == 0 => {
                let hours = secs / 3600;
                if hours == 1 {
                    write!(f, "every hour")
                } else {
                    write!(f, "every {hours} hours")
                }
            }
            Self::Every { secs } if secs >= 60 && secs % 60 == 0 => {
                let minutes = secs / 60;
                if minutes == 1 {
                    write!(f, "every minute")
                } else {
                    write!(f, "every {minutes} minutes")
                }
            }
            Self::Every { secs } => write!(f, "every {secs}s"),
            Self::Once => write!(f, "once"),
        }
    }
}

/// The work a task performs on each dispatch.
///
/// Returns `Ok(Some(payload))` to publish a result to the runner's sink,
/// `Ok(None)` to finish quietly, or an error which the runner logs.
pub type TaskAction<P> =
    Arc<dyn Fn() -> BoxFuture<'static, crate::Result<Option<P>>> + Send + Sync>;

/// A named unit of scheduled work.
///
/// Tasks are registered with a [`TaskRunner`](super::TaskRunner); their name
/// is the identity under which status is reported and re-registration
/// replaces earlier entries.
pub struct Task<P> {
    pub(super) name: String,
    pub(super) action: TaskAction<P>,
    pub(super) interval: TaskInterval,
    pub(super) priority: u32,
    pub(super) initial_delay: Duration,
}

impl<P> Task<P> {
    /// Create a task from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, interval: TaskInterval, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<Option<P>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || action().boxed()),
            interval,
            priority: DEFAULT_PRIORITY,
            initial_delay: Duration::ZERO,
        }
    }

    /// Set the dispatch priority; lower values win deadline ties.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay the first dispatch after registration. Defaults to running
    /// immediately.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// The task's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's repeat interval.
    pub fn interval(&self) -> TaskInterval {
        self.interval
    }

    /// The task's dispatch priority.
    pub fn priority(&self) -> u32 {
        self.priority
    }
}

impl<P> Clone for Task<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: Arc::clone(&self.action),
            interval: self.interval,
            priority: self.priority,
            initial_delay: self.initial_delay,
        }
    }
}

impl<P> fmt::Debug for Task<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("priority", &self.priority)
            .field("initial_delay", &self.initial_delay)
            .finish_non_exhaustive()
    }
}

/// One row of the runner's status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub interval: TaskInterval,
    pub priority: u32,
    /// Wall-clock time of the last dispatch, if any.
    pub last_run: Option<DateTime<Utc>>,
    /// Projected wall-clock time of the next dispatch.
    pub next_run: DateTime<Utc>,
    pub seconds_until_next_run: u64,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn interval_periods() {
        assert_eq!(
            TaskInterval::Every { secs: 300 }.period(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(TaskInterval::Once.period(), None);
    }

    #[test]
    fn interval_display_is_human_readable() {
        assert_eq!(TaskInterval::Every { secs: 86_400 }.to_string(), "every 24 hours");
        assert_eq!(TaskInterval::Every { secs: 3600 }.to_string(), "every hour");
        assert_eq!(TaskInterval::Every { secs: 300 }.to_string(), "every 5 minutes");
        assert_eq!(TaskInterval::Every { secs: 45 }.to_string(), "every 45s");
        assert_eq!(TaskInterval::Once.to_string(), "once");
    }

    #[test]
    fn interval_serde_representation() {
        let every: TaskInterval = serde_json::from_str(r#"{"type":"every","secs":300}"#).unwrap();
        assert_eq!(every, TaskInterval::Every { secs: 300 });

        let once: TaskInterval = serde_json::from_str(r#"{"type":"once"}"#).unwrap();
        assert_eq!(once, TaskInterval::Once);
    }

    #[tokio::test]
    async fn builders_and_action_wiring() {
        let task: Task<u32> = Task::new("probe", TaskInterval::Once, || async { Ok(Some(5)) })
            .with_priority(1)
            .with_initial_delay(Duration::from_secs(30));

        assert_eq!(task.name(), "probe");
        assert_eq!(task.priority(), 1);
        assert_eq!(task.initial_delay, Duration::from_secs(30));
        assert_eq!((task.action)().await.unwrap(), Some(5));
    }
}
