//! Sources that fire a session's trigger: a periodic timer and a
//! rising-edge condition.

use crate::session::{SyncSession, SyncTask};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Triggers a session periodically. Dropping it stops the timer.
#[derive(Debug)]
pub struct IntervalSync {
    handle: JoinHandle<()>,
    period: Duration,
}

impl IntervalSync {
    /// Starts a timer firing every `seconds`, first after one full period.
    ///
    /// Returns `None` if `seconds` is not positive or the session has no task.
    pub fn spawn(session: SyncSession, seconds: i64) -> Option<Self> {
        let Some(period) = u64::try_from(seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
        else {
            info!(seconds, "sync interval must be greater than 0 to enable auto sync");
            return None;
        };
        if !session.is_enabled() {
            debug!("sync disabled, not starting interval");
            return None;
        }

        info!(seconds, "setting up sync interval");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                session.trigger().await;
            }
        });
        Some(Self { handle, period })
    }

    /// Returns the timer period.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for IntervalSync {
    fn drop(&mut self) {
        debug!("clearing sync interval");
        self.handle.abort();
    }
}

/// Keeps an [`IntervalSync`] matched to the session's task and interval.
pub struct AutoSync {
    session: SyncSession,
    task: Option<Arc<dyn SyncTask>>,
    seconds: i64,
    timer: Option<IntervalSync>,
}

impl AutoSync {
    /// Starts auto sync with the session's task and configured interval.
    pub fn new(session: SyncSession) -> Self {
        let task = session.task();
        let seconds = session.config().sync_interval_seconds;
        let timer = IntervalSync::spawn(session.clone(), seconds);
        Self {
            session,
            task,
            seconds,
            timer,
        }
    }

    /// Swaps the task and interval, restarting the timer if either changed.
    ///
    /// Returns true if the timer was torn down and recreated.
    pub fn reconfigure(&mut self, task: Option<Arc<dyn SyncTask>>, seconds: i64) -> bool {
        let same_task = match (&self.task, &task) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if same_task && self.seconds == seconds {
            return false;
        }

        self.timer = None;
        self.session.set_task(task.clone());
        self.task = task;
        self.seconds = seconds;
        self.timer = IntervalSync::spawn(self.session.clone(), seconds);
        true
    }

    /// Returns true if a timer is running.
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }
}

impl fmt::Debug for AutoSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSync")
            .field("enabled", &self.task.is_some())
            .field("seconds", &self.seconds)
            .field("timer", &self.timer)
            .finish()
    }
}

/// Fires the trigger on each false to true transition of a flag.
#[derive(Debug)]
pub struct ConditionSync {
    session: SyncSession,
    previous: bool,
}

impl ConditionSync {
    /// Creates a detector. An initial `true` counts as a transition.
    pub fn new(session: SyncSession) -> Self {
        Self {
            session,
            previous: false,
        }
    }

    /// Records the flag's current value.
    ///
    /// Returns the trigger result on a rising edge, `None` otherwise.
    pub async fn observe(&mut self, condition: bool) -> Option<bool> {
        let rising = condition && !self.previous;
        self.previous = condition;
        if !rising {
            return None;
        }
        debug!("condition became true, performing sync");
        Some(self.session.trigger().await)
    }
}

/// Drives a [`ConditionSync`] from a watch channel until the sender is
/// dropped.
pub fn spawn_condition_sync(
    session: SyncSession,
    mut condition: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut detector = ConditionSync::new(session);
        loop {
            let value = *condition.borrow_and_update();
            detector.observe(value).await;
            if condition.changed().await.is_err() {
                break;
            }
        }
    })
}
