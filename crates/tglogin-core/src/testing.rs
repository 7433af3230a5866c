//! Hand-written fakes of the ports, shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    auth::{AuthClient, AuthClientFactory, AuthResult},
    domain::{ChatId, MessageId, MessageRef, UserId},
    errors::{AuthError, Error, MessagingError},
    messaging::{
        port::{MessagingPort, SendResult},
        types::ReplyMarkup,
    },
    store::SessionRepository,
    Result,
};

// ============== Messenger ==============

#[derive(Clone, Debug)]
pub struct SentMessage {
    pub msg: MessageRef,
    pub html: String,
    pub markup: ReplyMarkup,
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: Mutex<i32>,
    sends: Mutex<Vec<SentMessage>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    edit_attempts: AtomicUsize,
    edit_failures: Mutex<VecDeque<MessagingError>>,
    send_failures: Mutex<VecDeque<MessagingError>>,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1000),
            ..Default::default()
        }
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let mut guard = self.next_id.lock().unwrap();
        let id = *guard;
        *guard += 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    pub fn fail_next_edits(&self, errs: impl IntoIterator<Item = MessagingError>) {
        self.edit_failures.lock().unwrap().extend(errs);
    }

    pub fn fail_next_sends(&self, errs: impl IntoIterator<Item = MessagingError>) {
        self.send_failures.lock().unwrap().extend(errs);
    }

    pub fn sends(&self) -> Vec<SentMessage> {
        self.sends.lock().unwrap().clone()
    }

    /// Successful edits only.
    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn edit_attempts(&self) -> usize {
        self.edit_attempts.load(Ordering::SeqCst)
    }

    /// Every html the user could have seen, in order.
    pub fn rendered(&self) -> Vec<String> {
        let mut out: Vec<String> = self.sends().into_iter().map(|s| s.html).collect();
        out.extend(self.edits().into_iter().map(|(_, h)| h));
        out
    }

    pub fn last_edit(&self) -> Option<String> {
        self.edits.lock().unwrap().last().map(|(_, h)| h.clone())
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        markup: ReplyMarkup,
    ) -> SendResult<MessageRef> {
        if let Some(e) = self.send_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        let msg = self.alloc(chat_id);
        self.sends.lock().unwrap().push(SentMessage {
            msg,
            html: html.to_string(),
            markup,
        });
        Ok(msg)
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> SendResult<()> {
        self.edit_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.edit_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }
}

// ============== Remote auth ==============

/// Scripted remote client. Unscripted calls succeed.
#[derive(Default)]
pub struct FakeAuthClient {
    connect: Mutex<VecDeque<AuthResult<()>>>,
    request_code: Mutex<VecDeque<AuthResult<String>>>,
    verify_code: Mutex<VecDeque<AuthResult<()>>>,
    verify_password: Mutex<VecDeque<AuthResult<()>>>,
    export: Mutex<VecDeque<AuthResult<String>>>,
    fail_disconnect: AtomicBool,

    connects: AtomicUsize,
    disconnects: AtomicUsize,
    code_requests: Mutex<Vec<(String, Instant)>>,
    code_checks: Mutex<Vec<(String, String, String)>>,
    passwords: Mutex<Vec<String>>,
}

impl FakeAuthClient {
    pub fn script_connect(&self, r: impl IntoIterator<Item = AuthResult<()>>) {
        self.connect.lock().unwrap().extend(r);
    }

    pub fn script_request_code(&self, r: impl IntoIterator<Item = AuthResult<String>>) {
        self.request_code.lock().unwrap().extend(r);
    }

    pub fn script_verify_code(&self, r: impl IntoIterator<Item = AuthResult<()>>) {
        self.verify_code.lock().unwrap().extend(r);
    }

    pub fn script_verify_password(&self, r: impl IntoIterator<Item = AuthResult<()>>) {
        self.verify_password.lock().unwrap().extend(r);
    }

    pub fn script_export(&self, r: impl IntoIterator<Item = AuthResult<String>>) {
        self.export.lock().unwrap().extend(r);
    }

    pub fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> Vec<(String, Instant)> {
        self.code_requests.lock().unwrap().clone()
    }

    pub fn code_checks(&self) -> Vec<(String, String, String)> {
        self.code_checks.lock().unwrap().clone()
    }

    pub fn passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthClient for FakeAuthClient {
    async fn connect(&self) -> AuthResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn request_code(&self, phone: &str) -> AuthResult<String> {
        self.code_requests
            .lock()
            .unwrap()
            .push((phone.to_string(), Instant::now()));
        self.request_code
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("hash-abc".to_string()))
    }

    async fn verify_code(&self, phone: &str, code_hash: &str, code: &str) -> AuthResult<()> {
        self.code_checks.lock().unwrap().push((
            phone.to_string(),
            code_hash.to_string(),
            code.to_string(),
        ));
        self.verify_code.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn verify_password(&self, password: &str) -> AuthResult<()> {
        self.passwords.lock().unwrap().push(password.to_string());
        self.verify_password
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn export_portable_session(&self) -> AuthResult<String> {
        self.export
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("portable-session".to_string()))
    }

    async fn disconnect(&self) -> AuthResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(AuthError::ConnectionFailure("already gone".to_string()));
        }
        Ok(())
    }
}

/// Hands out queued clients, or fresh unscripted ones.
#[derive(Default)]
pub struct FakeAuthFactory {
    queued: Mutex<VecDeque<Arc<FakeAuthClient>>>,
    created: Mutex<Vec<Arc<FakeAuthClient>>>,
}

impl FakeAuthFactory {
    pub fn enqueue(&self, client: Arc<FakeAuthClient>) {
        self.queued.lock().unwrap().push_back(client);
    }

    pub fn created(&self) -> Vec<Arc<FakeAuthClient>> {
        self.created.lock().unwrap().clone()
    }
}

impl AuthClientFactory for FakeAuthFactory {
    fn create(&self, _user_id: UserId) -> Arc<dyn AuthClient> {
        let client = self.queued.lock().unwrap().pop_front().unwrap_or_default();
        self.created.lock().unwrap().push(client.clone());
        client
    }
}

// ============== Session repository ==============

#[derive(Default)]
pub struct MemoryRepository {
    sessions: Mutex<HashMap<UserId, String>>,
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn with_session(user_id: UserId, session: &str) -> Self {
        let repo = Self::default();
        repo.sessions
            .lock()
            .unwrap()
            .insert(user_id, session.to_string());
        repo
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn stored(&self, user_id: UserId) -> Option<String> {
        self.sessions.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn get_session(&self, user_id: UserId) -> Result<Option<String>> {
        Ok(self.stored(user_id))
    }

    async fn set_session(&self, user_id: UserId, session: Option<String>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("disk full".to_string()));
        }
        let mut map = self.sessions.lock().unwrap();
        match session {
            Some(s) => map.insert(user_id, s),
            None => map.remove(&user_id),
        };
        Ok(())
    }
}
