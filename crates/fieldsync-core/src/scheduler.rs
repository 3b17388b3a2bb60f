//! In-process deferred-retry scheduler.
//!
//! Stands in for the platform facility that wakes the worker when a registered
//! task is due or connectivity returns. Registration is keyed by tag, so a
//! task is pending at most once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Deferred work the engine knows how to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskTag {
    SyncData,
    SendErrorReports,
}

/// A task handed to the worker for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTask {
    pub tag: TaskTag,
    /// Zero for the first run after registration
    pub attempt: u32,
    /// Set on the final attempt of the retry budget
    pub last_chance: bool,
}

/// What the task asks the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Retry,
}

/// Retry budget with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total runs per registration, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before the given attempt (0-indexed); attempt 0 runs immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.max_delay)
    }

    pub const fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    attempt: u32,
    due_at: Instant,
}

struct Inner {
    policy: RetryPolicy,
    tasks: Mutex<BTreeMap<TaskTag, Registration>>,
    changed: Notify,
}

/// Shared registry of pending deferred tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                tasks: Mutex::new(BTreeMap::new()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    fn tasks(&self) -> MutexGuard<'_, BTreeMap<TaskTag, Registration>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task to run as soon as possible.
    ///
    /// Returns `false` when the tag is already pending; the existing
    /// registration keeps its attempt count and due time.
    pub fn register(&self, tag: TaskTag) -> bool {
        let inserted = {
            let mut tasks = self.tasks();
            if tasks.contains_key(&tag) {
                false
            } else {
                tasks.insert(
                    tag,
                    Registration {
                        attempt: 0,
                        due_at: Instant::now(),
                    },
                );
                true
            }
        };

        if inserted {
            tracing::debug!("Registered deferred task {tag:?}");
            self.inner.changed.notify_one();
        }
        inserted
    }

    pub fn is_registered(&self, tag: TaskTag) -> bool {
        self.tasks().contains_key(&tag)
    }

    pub fn registered(&self) -> Vec<TaskTag> {
        self.tasks().keys().copied().collect()
    }

    /// Make every pending task due immediately.
    pub fn connectivity_restored(&self) {
        let now = Instant::now();
        let count = {
            let mut tasks = self.tasks();
            for registration in tasks.values_mut() {
                registration.due_at = now;
            }
            tasks.len()
        };

        if count > 0 {
            tracing::info!("Connectivity restored; {count} deferred task(s) due");
            self.inner.changed.notify_one();
        }
    }

    /// Earliest due time among pending tasks.
    pub fn next_due_at(&self) -> Option<Instant> {
        self.tasks()
            .values()
            .map(|registration| registration.due_at)
            .min()
    }

    /// Remove and return every task due at `now`.
    pub fn take_due(&self, now: Instant) -> Vec<DueTask> {
        let mut tasks = self.tasks();
        let due: Vec<TaskTag> = tasks
            .iter()
            .filter(|(_, registration)| registration.due_at <= now)
            .map(|(tag, _)| *tag)
            .collect();

        due.into_iter()
            .filter_map(|tag| tasks.remove(&tag).map(|registration| (tag, registration)))
            .map(|(tag, registration)| DueTask {
                tag,
                attempt: registration.attempt,
                last_chance: self.inner.policy.is_last_attempt(registration.attempt),
            })
            .collect()
    }

    /// Record the outcome of a task returned by [`TaskScheduler::take_due`].
    ///
    /// A retry requested on the last chance is dropped. A task that
    /// re-registered itself while running keeps the fresh registration.
    pub fn complete(&self, task: DueTask, outcome: TaskOutcome) {
        if outcome == TaskOutcome::Done {
            return;
        }
        if task.last_chance {
            tracing::warn!(
                "Dropping deferred task {:?} after {} attempts",
                task.tag,
                task.attempt + 1
            );
            return;
        }

        let attempt = task.attempt + 1;
        let delay = self.inner.policy.delay_for_attempt(attempt);
        let inserted = {
            let mut tasks = self.tasks();
            if tasks.contains_key(&task.tag) {
                false
            } else {
                tasks.insert(
                    task.tag,
                    Registration {
                        attempt,
                        due_at: Instant::now() + delay,
                    },
                );
                true
            }
        };

        if inserted {
            tracing::info!(
                "Retrying deferred task {:?} in {:?} (attempt {})",
                task.tag,
                delay,
                attempt + 1
            );
            self.inner.changed.notify_one();
        }
    }

    /// Resolves after the pending set changes.
    pub async fn changed(&self) {
        self.inner.changed.notified().await;
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
