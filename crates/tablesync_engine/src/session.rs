//! Sync trigger controller.
//!
//! A [`SyncSession`] runs at most one sync cycle at a time. Triggers that
//! arrive while a cycle is in flight are dropped, not queued.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tablesync_protocol::{unix_seconds, SyncStats, Timestamp};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Hook receiving per-table change counts.
pub type StatsHook = Arc<dyn Fn(&str, SyncStats) + Send + Sync>;

/// Hook receiving a sync error.
pub type ErrorHook = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Hook receiving a user-facing status message.
pub type NotifyHook = Arc<dyn Fn(&str) + Send + Sync>;

/// User callbacks invoked during sync.
#[derive(Clone)]
pub struct SyncHooks {
    /// Called once per table after its pull.
    pub on_pull: StatsHook,
    /// Called once per table before its push.
    pub on_push: StatsHook,
    /// Receives errors the failure handler translates.
    pub on_error: Option<ErrorHook>,
    /// Receives "Synchronized" or "Offline" after each cycle.
    pub notify: NotifyHook,
}

impl SyncHooks {
    /// Creates hooks that log to `tracing`.
    pub fn new() -> Self {
        Self {
            on_pull: Arc::new(|table: &str, stats: SyncStats| {
                info!(
                    table,
                    created = stats.created,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    "pulled changes"
                );
            }),
            on_push: Arc::new(|table: &str, stats: SyncStats| {
                info!(
                    table,
                    created = stats.created,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    "pushing changes"
                );
            }),
            on_error: None,
            notify: Arc::new(|message: &str| info!("{message}")),
        }
    }

    /// Sets the pull hook.
    pub fn with_on_pull(mut self, hook: impl Fn(&str, SyncStats) + Send + Sync + 'static) -> Self {
        self.on_pull = Arc::new(hook);
        self
    }

    /// Sets the push hook.
    pub fn with_on_push(mut self, hook: impl Fn(&str, SyncStats) + Send + Sync + 'static) -> Self {
        self.on_push = Arc::new(hook);
        self
    }

    /// Sets the error hook.
    pub fn with_on_error(mut self, hook: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Sets the notification hook.
    pub fn with_notify(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.notify = Arc::new(hook);
        self
    }
}

impl Default for SyncHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHooks")
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// What a running cycle can reach: hooks and the event channel.
#[derive(Clone)]
pub struct SyncContext {
    hooks: SyncHooks,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncContext {
    /// Creates a context with its own event channel.
    pub fn new(hooks: SyncHooks, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { hooks, events }
    }

    /// Returns the hooks.
    pub fn hooks(&self) -> &SyncHooks {
        &self.hooks
    }

    /// Sends an event. Having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribes to events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("hooks", &self.hooks)
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

/// One full sync cycle.
#[async_trait]
pub trait SyncTask: Send + Sync {
    /// Runs the cycle.
    async fn run(&self, ctx: &SyncContext) -> SyncResult<()>;
}

/// Snapshot of a session's trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerState {
    /// A cycle is in flight.
    pub busy: bool,
    /// The last cycle succeeded.
    pub online: bool,
    /// End of the last attempted cycle, in Unix seconds.
    pub last_sync_time: Option<Timestamp>,
}

struct Inner {
    config: SyncConfig,
    context: SyncContext,
    task: RwLock<Option<Arc<dyn SyncTask>>>,
    busy: AtomicBool,
    online: AtomicBool,
    last_sync_time: RwLock<Option<Timestamp>>,
}

/// Releases the busy flag and stamps the sync time, even if the cycle
/// is cancelled or panics.
struct BusyGuard<'a> {
    inner: &'a Inner,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *self.inner.last_sync_time.write() = Some(unix_seconds());
        self.inner.busy.store(false, Ordering::Release);
        debug!("sync end");
    }
}

/// Handle to a single-flight sync controller. Clones share state.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<Inner>,
}

impl SyncSession {
    /// Creates a session. `task = None` leaves sync disabled.
    pub fn new(
        config: SyncConfig,
        hooks: SyncHooks,
        task: Option<Arc<dyn SyncTask>>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let context = SyncContext::new(hooks, config.event_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                context,
                task: RwLock::new(task),
                busy: AtomicBool::new(false),
                online: AtomicBool::new(false),
                last_sync_time: RwLock::new(None),
            }),
        })
    }

    /// Runs one sync cycle unless one is already running or sync is disabled.
    ///
    /// Returns true only if a cycle ran and succeeded.
    pub async fn trigger(&self) -> bool {
        let inner = &*self.inner;
        debug!("sync try");

        if inner.busy.load(Ordering::Acquire) {
            debug!("sync already in progress, ignoring trigger");
            return false;
        }
        let Some(task) = self.task() else {
            debug!("sync disabled, ignoring trigger");
            return false;
        };
        if inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync already in progress, ignoring trigger");
            return false;
        }
        let _guard = BusyGuard { inner };

        debug!("sync start");
        inner.context.emit(SyncEvent::Started);

        match task.run(&inner.context).await {
            Ok(()) => {
                (inner.context.hooks.notify)("Synchronized");
                inner.online.store(true, Ordering::Release);
                inner.context.emit(SyncEvent::Succeeded { at: unix_seconds() });
                true
            }
            Err(err) => {
                warn!(error = %err, "sync failed");
                (inner.context.hooks.notify)("Offline");
                inner.online.store(false, Ordering::Release);
                inner.context.emit(SyncEvent::Failed {
                    error: err.to_string(),
                    at: unix_seconds(),
                });
                false
            }
        }
    }

    /// Returns a snapshot of the trigger state.
    pub fn state(&self) -> TriggerState {
        TriggerState {
            busy: self.inner.busy.load(Ordering::Acquire),
            online: self.inner.online.load(Ordering::Acquire),
            last_sync_time: *self.inner.last_sync_time.read(),
        }
    }

    /// Returns true if a task is configured.
    pub fn is_enabled(&self) -> bool {
        self.inner.task.read().is_some()
    }

    /// Returns the configured task.
    pub fn task(&self) -> Option<Arc<dyn SyncTask>> {
        self.inner.task.read().clone()
    }

    /// Replaces the task. `None` disables sync.
    pub fn set_task(&self, task: Option<Arc<dyn SyncTask>>) {
        *self.inner.task.write() = task;
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.context.subscribe()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTask {
        runs: AtomicUsize,
        delay: Option<Duration>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SyncTask for CountingTask {
        async fn run(&self, _ctx: &SyncContext) -> SyncResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::remote("notes", "getList", "unreachable"));
            }
            Ok(())
        }
    }

    fn session_with(task: Arc<CountingTask>, hooks: SyncHooks) -> SyncSession {
        SyncSession::new(SyncConfig::default(), hooks, Some(task)).unwrap()
    }

    fn notifications() -> (Arc<Mutex<Vec<String>>>, SyncHooks) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = SyncHooks::new().with_notify(move |m| sink.lock().push(m.to_string()));
        (seen, hooks)
    }

    #[tokio::test]
    async fn success_marks_online() {
        let task = Arc::new(CountingTask::default());
        let (seen, hooks) = notifications();
        let session = session_with(Arc::clone(&task), hooks);
        let mut events = session.subscribe();

        assert!(session.trigger().await);

        let state = session.state();
        assert!(state.online);
        assert!(!state.busy);
        assert!(state.last_sync_time.is_some());
        assert_eq!(*seen.lock(), vec!["Synchronized".to_string()]);
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Started);
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::Succeeded { .. }
        ));
    }

    #[tokio::test]
    async fn failure_marks_offline() {
        let task = Arc::new(CountingTask::default());
        let (seen, hooks) = notifications();
        let session = session_with(Arc::clone(&task), hooks);
        assert!(session.trigger().await);
        assert!(session.state().online);

        task.fail.store(true, Ordering::SeqCst);
        assert!(!session.trigger().await);

        let state = session.state();
        assert!(!state.online);
        assert!(!state.busy);
        assert!(state.last_sync_time.is_some());
        assert_eq!(
            *seen.lock(),
            vec!["Synchronized".to_string(), "Offline".to_string()]
        );
    }

    #[tokio::test]
    async fn disabled_session_does_nothing() {
        let (seen, hooks) = notifications();
        let session = SyncSession::new(SyncConfig::default(), hooks, None).unwrap();

        assert!(!session.is_enabled());
        assert!(!session.trigger().await);
        assert_eq!(session.state().last_sync_time, None);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped() {
        let task = Arc::new(CountingTask {
            delay: Some(Duration::from_millis(50)),
            ..CountingTask::default()
        });
        let session = session_with(Arc::clone(&task), SyncHooks::new());

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.trigger().await })
        };
        while !session.state().busy {
            tokio::task::yield_now().await;
        }

        assert!(!session.trigger().await);
        assert!(first.await.unwrap());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert!(!session.state().busy);
    }

    #[tokio::test]
    async fn set_task_enables_sync() {
        let session = SyncSession::new(SyncConfig::default(), SyncHooks::new(), None).unwrap();
        let task = Arc::new(CountingTask::default());
        session.set_task(Some(task.clone()));

        assert!(session.trigger().await);
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig::new().with_event_capacity(0);
        assert!(SyncSession::new(config, SyncHooks::new(), None).is_err());
    }
}
