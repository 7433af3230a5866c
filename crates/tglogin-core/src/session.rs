//! In-memory login sessions and the registry that owns their lifecycle.
//!
//! At most one live [`Session`] exists per user. Every exit path goes through
//! [`SessionRegistry::retire`]: stop the animator, close the remote handle,
//! then drop the registry entry. Retiring is idempotent.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard},
};

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    animator::AnimatorHandle,
    auth::AuthClient,
    domain::{ChatId, MessageRef, UserId},
};

/// Steps of the phone + code + optional password login.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoginStep {
    WaitingPhone,
    WaitingCode,
    WaitingPassword,
    /// Terminal; the session is retired as soon as it gets here.
    Complete,
}

impl LoginStep {
    /// Completion percentage shown on the progress bar.
    pub fn percent(self) -> u8 {
        match self {
            LoginStep::WaitingPhone => 30,
            LoginStep::WaitingCode => 60,
            LoginStep::WaitingPassword => 80,
            LoginStep::Complete => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoginStep::WaitingPhone => "waiting_phone",
            LoginStep::WaitingCode => "waiting_code",
            LoginStep::WaitingPassword => "waiting_password",
            LoginStep::Complete => "complete",
        }
    }
}

#[derive(Debug)]
struct StatusTrack {
    message: MessageRef,
    last_activity: Instant,
}

/// One user's in-progress login attempt.
///
/// The status message, activity clock and cancel token live outside the state
/// lock: the animator rebinds the message while a step holds the lock, the
/// sweeper reads the clock without waiting on in-flight steps, and a cancel
/// must reach a step that is parked on a remote call or a rate-limit sleep.
pub struct Session {
    pub user_id: UserId,
    pub chat_id: ChatId,
    status: StdMutex<StatusTrack>,
    cancel: CancellationToken,
    state: Mutex<LoginState>,
}

/// Mutable part of a session, guarded by the per-session lock.
pub struct LoginState {
    pub step: LoginStep,
    pub phone_number: Option<String>,
    pub code_hash: Option<String>,
    pub(crate) remote: Option<Arc<dyn AuthClient>>,
    pub(crate) animator: Option<AnimatorHandle>,
    retired: bool,
}

impl Session {
    fn new(user_id: UserId, chat_id: ChatId, status_message: MessageRef) -> Self {
        Self {
            user_id,
            chat_id,
            status: StdMutex::new(StatusTrack {
                message: status_message,
                last_activity: Instant::now(),
            }),
            cancel: CancellationToken::new(),
            state: Mutex::new(LoginState {
                step: LoginStep::WaitingPhone,
                phone_number: None,
                code_hash: None,
                remote: None,
                animator: None,
                retired: false,
            }),
        }
    }

    fn track(&self) -> StdMutexGuard<'_, StatusTrack> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status_message(&self) -> MessageRef {
        self.track().message
    }

    /// Point the session at a replacement status message.
    pub fn rebind_status(&self, message: MessageRef) {
        self.track().message = message;
    }

    pub fn touch(&self) {
        self.track().last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.track().last_activity
    }

    /// Ask an in-flight step to give up at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`Session::cancel`] has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub async fn lock(&self) -> MutexGuard<'_, LoginState> {
        self.state.lock().await
    }

    /// `None` while a step is in flight.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, LoginState>> {
        self.state.try_lock().ok()
    }
}

impl LoginState {
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn has_animator(&self) -> bool {
        self.animator.is_some()
    }

    /// Cancel and await the animator, if one is running.
    pub(crate) async fn stop_animator(&mut self) {
        if let Some(animator) = self.animator.take() {
            animator.stop().await;
        }
    }

    /// Close the remote handle, if open. Disconnect errors are swallowed.
    pub(crate) async fn close_remote(&mut self, user_id: UserId) {
        let Some(remote) = self.remote.take() else {
            return;
        };
        if let Err(e) = remote.disconnect().await {
            debug!(user_id = user_id.0, error = %e, "remote disconnect failed (ignored)");
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("a login session is already active for user {0}")]
pub struct AlreadyExists(pub UserId);

/// User id → live session. The single authority on session lifecycle.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<UserId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. Refuses to overwrite an in-flight one.
    pub async fn start(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        status_message: MessageRef,
    ) -> Result<Arc<Session>, AlreadyExists> {
        let mut map = self.sessions.lock().await;
        if map.contains_key(&user_id) {
            return Err(AlreadyExists(user_id));
        }
        let session = Arc::new(Session::new(user_id, chat_id, status_message));
        map.insert(user_id, session.clone());
        Ok(session)
    }

    pub async fn get(&self, user_id: UserId) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    /// Drop the entry for `user_id`. No-op when absent.
    pub async fn remove(&self, user_id: UserId) {
        self.sessions.lock().await.remove(&user_id);
    }

    /// Drop the entry only if it still is `session` (never a newer attempt).
    async fn detach(&self, session: &Arc<Session>) {
        let mut map = self.sessions.lock().await;
        if map
            .get(&session.user_id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            map.remove(&session.user_id);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Full teardown for a caller that already holds the session's state lock.
    pub async fn retire(&self, session: &Arc<Session>, state: &mut LoginState) {
        let was_live = !state.retired;
        state.retired = true;
        session.cancel();
        state.stop_animator().await;
        state.close_remote(session.user_id).await;
        self.detach(session).await;
        if was_live {
            info!(
                user_id = session.user_id.0,
                step = state.step.as_str(),
                "login session retired"
            );
        }
    }

    /// Full teardown by user id. Returns whether a session was present.
    ///
    /// The session is cancelled before its lock is taken, so an in-flight step
    /// bails out instead of finishing first.
    pub async fn teardown(&self, user_id: UserId) -> bool {
        let Some(session) = self.get(user_id).await else {
            return false;
        };
        session.cancel();
        let mut state = session.lock().await;
        self.retire(&session, &mut state).await;
        true
    }

    /// Tear down every live session (process shutdown).
    pub async fn teardown_all(&self) {
        for session in self.snapshot().await {
            session.cancel();
            let mut state = session.lock().await;
            self.retire(&session, &mut state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::testing::FakeAuthClient;

    fn msg(chat: i64, id: i32) -> MessageRef {
        MessageRef {
            chat_id: ChatId(chat),
            message_id: MessageId(id),
        }
    }

    #[tokio::test]
    async fn start_refuses_to_overwrite() {
        let registry = SessionRegistry::new();
        registry
            .start(UserId(1), ChatId(1), msg(1, 10))
            .await
            .unwrap();
        let err = registry
            .start(UserId(1), ChatId(1), msg(1, 11))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, UserId(1));
        assert_eq!(
            registry.get(UserId(1)).await.unwrap().status_message(),
            msg(1, 10)
        );
    }

    #[tokio::test]
    async fn sessions_of_different_users_are_independent() {
        let registry = SessionRegistry::new();
        let a = registry
            .start(UserId(1), ChatId(1), msg(1, 10))
            .await
            .unwrap();
        let b = registry
            .start(UserId(2), ChatId(2), msg(2, 20))
            .await
            .unwrap();

        a.lock().await.step = LoginStep::WaitingCode;
        a.rebind_status(msg(1, 99));

        assert_eq!(b.lock().await.step, LoginStep::WaitingPhone);
        assert_eq!(b.status_message(), msg(2, 20));

        assert!(registry.teardown(UserId(1)).await);
        assert!(registry.get(UserId(1)).await.is_none());
        assert!(registry.get(UserId(2)).await.is_some());
    }

    #[tokio::test]
    async fn remove_and_teardown_are_idempotent() {
        let registry = SessionRegistry::new();
        registry.remove(UserId(5)).await;
        assert!(!registry.teardown(UserId(5)).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn retire_closes_remote_exactly_once() {
        let registry = SessionRegistry::new();
        let session = registry
            .start(UserId(1), ChatId(1), msg(1, 10))
            .await
            .unwrap();
        let remote = Arc::new(FakeAuthClient::default());
        session.lock().await.remote = Some(remote.clone());

        let mut state = session.lock().await;
        registry.retire(&session, &mut state).await;
        registry.retire(&session, &mut state).await;
        drop(state);
        assert!(!registry.teardown(UserId(1)).await);

        assert_eq!(remote.disconnects(), 1);
        assert!(session.lock().await.is_retired());
    }

    #[tokio::test]
    async fn teardown_cancels_before_waiting_for_the_lock() {
        let registry = Arc::new(SessionRegistry::new());
        let session = registry
            .start(UserId(1), ChatId(1), msg(1, 10))
            .await
            .unwrap();

        let step = {
            let session = session.clone();
            tokio::spawn(async move {
                let _state = session.lock().await;
                session.cancelled().await;
            })
        };
        tokio::task::yield_now().await;

        assert!(registry.teardown(UserId(1)).await);
        step.await.unwrap();
        assert!(session.is_cancelled());
        assert!(session.lock().await.is_retired());
    }

    #[tokio::test]
    async fn stale_retire_does_not_remove_a_newer_session() {
        let registry = SessionRegistry::new();
        let old = registry
            .start(UserId(1), ChatId(1), msg(1, 10))
            .await
            .unwrap();
        registry.remove(UserId(1)).await;
        let newer = registry
            .start(UserId(1), ChatId(1), msg(1, 11))
            .await
            .unwrap();

        let mut state = old.lock().await;
        registry.retire(&old, &mut state).await;
        drop(state);

        let current = registry.get(UserId(1)).await.unwrap();
        assert!(Arc::ptr_eq(&current, &newer));
    }
}
