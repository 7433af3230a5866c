//! Background eviction of abandoned login sessions.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionRegistry;

/// Singleton sweeper: `ensure_running` is idempotent.
pub struct Sweeper {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    period: Duration,
    task: Mutex<Option<SweeperTask>>,
}

struct SweeperTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration, period: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
            period,
            task: Mutex::new(None),
        }
    }

    /// Start the sweep loop unless one is already running.
    ///
    /// Returns `true` when this call started it.
    pub async fn ensure_running(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = self.registry.clone();
        let idle_timeout = self.idle_timeout;
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        sweep_expired(&registry, idle_timeout).await;
                    }
                }
            }
        });

        *task = Some(SweeperTask { cancel, handle });
        info!(
            idle_timeout_secs = idle_timeout.as_secs(),
            period_secs = period.as_secs(),
            "login sweeper started"
        );
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.cancel.cancel();
        let _ = task.handle.await;
    }
}

/// One sweep pass; returns how many sessions were evicted.
///
/// Sessions whose state is locked by an in-flight step are skipped: they are
/// active, and waiting on them would stall every other user's eviction.
pub async fn sweep_expired(registry: &SessionRegistry, idle_timeout: Duration) -> usize {
    let now = Instant::now();
    let mut evicted = 0usize;

    for session in registry.snapshot().await {
        if now.saturating_duration_since(session.last_activity()) <= idle_timeout {
            continue;
        }
        let Some(mut state) = session.try_lock() else {
            debug!(user_id = session.user_id.0, "idle session busy, skipping this sweep");
            continue;
        };
        if state.is_retired() {
            continue;
        }
        registry.retire(&session, &mut state).await;
        evicted += 1;
        info!(user_id = session.user_id.0, "idle login session evicted");
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, MessageId, MessageRef, UserId};
    use crate::testing::FakeAuthClient;

    fn status(chat: i64) -> MessageRef {
        MessageRef {
            chat_id: ChatId(chat),
            message_id: MessageId(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_sessions_past_the_idle_timeout() {
        let registry = SessionRegistry::new();
        let stale = registry
            .start(UserId(1), ChatId(1), status(1))
            .await
            .unwrap();
        let remote = Arc::new(FakeAuthClient::default());
        stale.lock().await.remote = Some(remote.clone());

        tokio::time::advance(Duration::from_secs(400)).await;
        registry
            .start(UserId(2), ChatId(2), status(2))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(201)).await;

        let evicted = sweep_expired(&registry, Duration::from_secs(600)).await;

        assert_eq!(evicted, 1);
        assert!(registry.get(UserId(1)).await.is_none());
        assert!(registry.get(UserId(2)).await.is_some());
        assert_eq!(remote.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_failure_does_not_abort_the_sweep() {
        let registry = SessionRegistry::new();
        for uid in 1..=3 {
            let s = registry
                .start(UserId(uid), ChatId(uid), status(uid))
                .await
                .unwrap();
            let remote = FakeAuthClient::default();
            if uid == 1 {
                remote.fail_disconnect();
            }
            s.lock().await.remote = Some(Arc::new(remote));
        }
        tokio::time::advance(Duration::from_secs(601)).await;

        assert_eq!(sweep_expired(&registry, Duration::from_secs(600)).await, 3);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_sessions_are_skipped() {
        let registry = SessionRegistry::new();
        let s = registry
            .start(UserId(1), ChatId(1), status(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;

        let guard = s.lock().await;
        assert_eq!(sweep_expired(&registry, Duration::from_secs(600)).await, 0);
        drop(guard);
        assert_eq!(sweep_expired(&registry, Duration::from_secs(600)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_evicts_within_one_period_after_expiry() {
        let registry = Arc::new(SessionRegistry::new());
        let sweeper = Sweeper::new(
            registry.clone(),
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        assert!(sweeper.ensure_running().await);
        registry
            .start(UserId(1), ChatId(1), status(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(registry.get(UserId(1)).await.is_some());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(registry.get(UserId(1)).await.is_none());

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_running_is_idempotent() {
        let registry = Arc::new(SessionRegistry::new());
        let sweeper = Sweeper::new(registry, Duration::from_secs(600), Duration::from_secs(60));

        assert!(sweeper.ensure_running().await);
        assert!(!sweeper.ensure_running().await);
        assert!(sweeper.is_running().await);

        sweeper.stop().await;
        assert!(!sweeper.is_running().await);
        assert!(sweeper.ensure_running().await);
        sweeper.stop().await;
    }
}
