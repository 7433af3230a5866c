//! Login state machine: phone → code → (password) → portable session.
//!
//! Consumes chat text for users with a live session, drives the remote auth
//! client, and keeps the status message current. Every remote call runs under
//! the animator; the animator is stopped (and awaited) before anything else
//! touches the status message.

use std::{
    future::Future,
    sync::{Arc, OnceLock},
};

use regex::Regex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    animator::ProgressAnimator,
    auth::{AuthClient, AuthClientFactory, AuthResult},
    config::LoginTiming,
    domain::{ChatId, UserId},
    errors::AuthError,
    formatting::short_description,
    messaging::{port::MessagingPort, types::ReplyMarkup},
    progress::ProgressReporter,
    session::{LoginState, LoginStep, Session, SessionRegistry},
    store::SessionRepository,
    sweeper::Sweeper,
    Result,
};

const GREETING: &str = "<b>👋 Hey! Let's log you in smoothly 🌟</b>";

const PHONE_PROMPT: &str = "📞 Please send your <b>Telegram Phone Number</b> with country code.\n\n\
<blockquote>Example: +919876543210</blockquote>\n\n\
<i>💡 Your number is used only for verification and is kept secure. 🔒</i>\n\n\
❌ Tap the <b>Cancel</b> button or send /cancel to stop.";

const CODE_PROMPT: &str = "<b>📩 OTP Sent to your app! 📲</b>\n\n\
Please open your Telegram app and copy the verification code.\n\n\
<b>Send it like this:</b> <code>12 345</code> or <code>1 2 3 4 5 6</code>\n\n\
<blockquote>Adding spaces helps prevent Telegram from deleting the message automatically. 💡</blockquote>";

const PASSWORD_PROMPT: &str = "<b>🔐 Two-Step Verification Detected 🔒</b>\n\n\
Please enter your account <b>password</b>.\n\n\
<i>Take your time, it's secure! 🛡️</i>";

const SUCCESS: &str = "<b>🎉 Login Successful! 🌟</b>\n\n\
<i>Your session has been saved securely. 🔒</i>\n\nYou can now use all features! 🚀";

pub const ALREADY_LOGGED_IN: &str =
    "<b>✅ You're already logged in! 🎉</b>\n\nTo switch accounts, first use /logout.";
pub const ALREADY_IN_PROGRESS: &str =
    "<b>⏳ A login is already in progress.</b>\n\nFinish it or send /cancel first.";
pub const CANCELLED: &str = "<b>❌ Login process cancelled. 😌</b>";
pub const LOGGED_OUT: &str = "<b>🚪 Logout Successful! 👋</b>\n\n\
<i>Your session has been cleared. You can log in again anytime! 🔄</i>";
const KEYBOARD_CLOSED: &str = "<i>✅ All done.</i>";

/// Keyword that cancels the flow from any step (also the Cancel button's text).
const CANCEL_KEYWORD: &str = "cancel";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyLoggedIn,
    AlreadyInProgress,
}

/// Result of one remote call with the single rate-limit retry applied.
enum Call<T> {
    Done(T),
    /// Failed on the first attempt (not rate limited).
    Failed(AuthError),
    /// Rate limited once, then failed again on the retry.
    FailedAfterRetry(AuthError),
    /// The session was cancelled while the call or the backoff was pending.
    Cancelled,
}

pub struct LoginFlow {
    registry: Arc<SessionRegistry>,
    sweeper: Sweeper,
    repo: Arc<dyn SessionRepository>,
    auth: Arc<dyn AuthClientFactory>,
    messenger: Arc<dyn MessagingPort>,
    reporter: ProgressReporter,
    animator: ProgressAnimator,
    timing: LoginTiming,
}

impl LoginFlow {
    pub fn new(
        registry: Arc<SessionRegistry>,
        repo: Arc<dyn SessionRepository>,
        auth: Arc<dyn AuthClientFactory>,
        messenger: Arc<dyn MessagingPort>,
        timing: LoginTiming,
    ) -> Self {
        Self {
            sweeper: Sweeper::new(registry.clone(), timing.idle_timeout, timing.sweep_interval),
            reporter: ProgressReporter::new(messenger.clone()),
            animator: ProgressAnimator::new(
                messenger.clone(),
                timing.frame_interval,
                timing.flood_buffer,
            ),
            registry,
            repo,
            auth,
            messenger,
            timing,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn has_active_session(&self, user_id: UserId) -> bool {
        self.registry.get(user_id).await.is_some()
    }

    /// `/login`: open a fresh session unless the user is already logged in.
    pub async fn start_login(&self, user_id: UserId, chat_id: ChatId) -> Result<StartOutcome> {
        self.sweeper.ensure_running().await;

        if self.repo.get_session(user_id).await?.is_some() {
            self.messenger
                .send_html(chat_id, ALREADY_LOGGED_IN, ReplyMarkup::None)
                .await?;
            return Ok(StartOutcome::AlreadyLoggedIn);
        }

        // A previous attempt may have been abandoned mid-flow.
        if self.registry.teardown(user_id).await {
            info!(user_id = user_id.0, "replaced stale login session");
        }

        let status = self
            .messenger
            .send_html(chat_id, GREETING, ReplyMarkup::CancelKeyboard)
            .await?;
        let session = match self.registry.start(user_id, chat_id, status).await {
            Ok(session) => session,
            Err(_) => {
                self.messenger
                    .send_html(chat_id, ALREADY_IN_PROGRESS, ReplyMarkup::None)
                    .await?;
                return Ok(StartOutcome::AlreadyInProgress);
            }
        };

        info!(user_id = user_id.0, "login session started");
        self.reporter
            .report(&session, LoginStep::WaitingPhone, PHONE_PROMPT)
            .await;
        Ok(StartOutcome::Started)
    }

    /// `/cancel`: tear down if active; always acknowledges.
    pub async fn cancel_login(&self, user_id: UserId, chat_id: ChatId) -> Result<bool> {
        let was_active = self.registry.teardown(user_id).await;
        if was_active {
            info!(user_id = user_id.0, "login cancelled by user");
        }
        self.messenger
            .send_html(chat_id, CANCELLED, ReplyMarkup::RemoveKeyboard)
            .await?;
        Ok(was_active)
    }

    /// `/logout`: drop any in-flight attempt and the durable session.
    pub async fn logout(&self, user_id: UserId, chat_id: ChatId) -> Result<()> {
        self.registry.teardown(user_id).await;
        self.repo.set_session(user_id, None).await?;
        info!(user_id = user_id.0, "user logged out");
        self.messenger
            .send_html(chat_id, LOGGED_OUT, ReplyMarkup::RemoveKeyboard)
            .await?;
        Ok(())
    }

    /// Feed one text message into the user's session.
    ///
    /// Returns `false` when the user has no live session (caller falls through).
    pub async fn handle_text(&self, user_id: UserId, text: &str) -> Result<bool> {
        let Some(session) = self.registry.get(user_id).await else {
            return Ok(false);
        };
        let text = text.trim();

        if is_cancel_text(text) {
            self.cancel_login(user_id, session.chat_id).await?;
            return Ok(true);
        }

        let mut state = session.lock().await;
        if state.is_retired() || session.is_cancelled() {
            // Torn down while this message waited for the lock.
            return Ok(false);
        }
        session.touch();

        match state.step {
            LoginStep::WaitingPhone => self.submit_phone(&session, &mut state, text).await,
            LoginStep::WaitingCode => self.submit_code(&session, &mut state, text).await,
            LoginStep::WaitingPassword => self.submit_password(&session, &mut state, text).await,
            LoginStep::Complete => {}
        }
        Ok(true)
    }

    /// Stop background work and drop every in-flight attempt.
    pub async fn shutdown(&self) {
        self.sweeper.stop().await;
        self.registry.teardown_all().await;
    }

    async fn submit_phone(&self, session: &Arc<Session>, state: &mut LoginState, text: &str) {
        let step = LoginStep::WaitingPhone;
        let phone = normalize_phone(text);
        if !is_valid_phone(&phone) {
            self.reporter
                .report(
                    session,
                    step,
                    "<b>❌ Invalid format! Please use + followed by digits (e.g., +919876543210).</b>",
                )
                .await;
            return;
        }

        self.reporter
            .report(session, step, "<b>🔄 Connecting to Telegram... 🌐</b>")
            .await;

        let client = self.auth.create(session.user_id);
        state.remote = Some(client.clone());

        let connected = self
            .call_with_retry(session, state, step, || {
                let client = client.clone();
                async move { client.connect().await }
            })
            .await;
        match connected {
            Call::Done(()) => {}
            Call::Cancelled => return,
            Call::Failed(e) | Call::FailedAfterRetry(e) => {
                let text = format!(
                    "<b>❌ Connection failed: {}. Please try /login again.</b>",
                    describe(&e)
                );
                self.abandon(session, state, step, &text).await;
                return;
            }
        }

        let requested = self
            .call_with_retry(session, state, step, || {
                let client = client.clone();
                let phone = phone.clone();
                async move { client.request_code(&phone).await }
            })
            .await;
        match requested {
            Call::Done(hash) if !hash.is_empty() => {
                state.phone_number = Some(phone);
                state.code_hash = Some(hash);
                state.step = LoginStep::WaitingCode;
                info!(user_id = session.user_id.0, "login code requested");
                self.reporter
                    .report(session, LoginStep::WaitingCode, CODE_PROMPT)
                    .await;
            }
            Call::Cancelled => {}
            Call::Done(_) => {
                let e = AuthError::GenericRemoteFailure("empty code hash".to_string());
                self.abandon_generic(session, state, step, &e).await;
            }
            Call::Failed(AuthError::Validation) => {
                self.abandon(
                    session,
                    state,
                    step,
                    "<b>❌ Oops! Invalid phone number. 😅 Please try /login again (e.g., +919876543210).</b>",
                )
                .await;
            }
            Call::Failed(e) => self.abandon_generic(session, state, step, &e).await,
            Call::FailedAfterRetry(_) => {
                self.abandon(
                    session,
                    state,
                    step,
                    "<b>❌ Failed after retry. Please try /login later.</b>",
                )
                .await;
            }
        }
    }

    async fn submit_code(&self, session: &Arc<Session>, state: &mut LoginState, text: &str) {
        let step = LoginStep::WaitingCode;
        let code: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if !is_valid_code(&code) {
            self.reporter
                .report(
                    session,
                    step,
                    "<b>❌ Invalid code! Please send digits only (with spaces if needed).</b>",
                )
                .await;
            return;
        }

        let (Some(client), Some(phone), Some(hash)) = (
            state.remote.clone(),
            state.phone_number.clone(),
            state.code_hash.clone(),
        ) else {
            let e = AuthError::GenericRemoteFailure("login state lost".to_string());
            self.abandon_generic(session, state, step, &e).await;
            return;
        };

        self.reporter
            .report(session, step, "<b>🔍 Verifying code... 🔍</b>")
            .await;

        let verified = self
            .call_with_retry(session, state, step, || {
                let client = client.clone();
                let (phone, hash, code) = (phone.clone(), hash.clone(), code.clone());
                async move { client.verify_code(&phone, &hash, &code).await }
            })
            .await;
        match verified {
            Call::Done(()) => self.finalize(session, state, client).await,
            Call::Cancelled => {}
            Call::Failed(AuthError::SecondFactorRequired)
            | Call::FailedAfterRetry(AuthError::SecondFactorRequired) => {
                state.step = LoginStep::WaitingPassword;
                info!(user_id = session.user_id.0, "second factor required");
                self.reporter
                    .report(session, LoginStep::WaitingPassword, PASSWORD_PROMPT)
                    .await;
            }
            Call::Failed(AuthError::WrongCredential) => {
                self.reporter
                    .report(
                        session,
                        step,
                        "<b>❌ Hmm, that code doesn't look right. 🔍 Please check and try again.</b>",
                    )
                    .await;
            }
            Call::Failed(AuthError::Expired) => {
                self.abandon(
                    session,
                    state,
                    step,
                    "<b>⏰ Code has expired. ⏳ Please start over with /login.</b>",
                )
                .await;
            }
            Call::Failed(e) => self.abandon_generic(session, state, step, &e).await,
            Call::FailedAfterRetry(_) => {
                self.abandon(
                    session,
                    state,
                    step,
                    "<b>❌ Verification failed after retry. Please try /login again.</b>",
                )
                .await;
            }
        }
    }

    async fn submit_password(&self, session: &Arc<Session>, state: &mut LoginState, text: &str) {
        let step = LoginStep::WaitingPassword;
        let Some(client) = state.remote.clone() else {
            let e = AuthError::GenericRemoteFailure("login state lost".to_string());
            self.abandon_generic(session, state, step, &e).await;
            return;
        };
        let password = text.to_string();

        self.reporter
            .report(session, step, "<b>🔑 Checking password... 🔑</b>")
            .await;

        let verified = self
            .call_with_retry(session, state, step, || {
                let client = client.clone();
                let password = password.clone();
                async move { client.verify_password(&password).await }
            })
            .await;
        match verified {
            Call::Done(()) => self.finalize(session, state, client).await,
            Call::Cancelled => {}
            Call::Failed(AuthError::WrongCredential) => {
                self.reporter
                    .report(
                        session,
                        step,
                        "<b>❌ Incorrect password. 🔑 Please try again.</b>",
                    )
                    .await;
            }
            Call::Failed(e) => self.abandon_generic(session, state, step, &e).await,
            Call::FailedAfterRetry(_) => {
                self.abandon(
                    session,
                    state,
                    step,
                    "<b>❌ Password check failed after retry. Please try /login again.</b>",
                )
                .await;
            }
        }
    }

    /// Export → close → persist → retire → render.
    async fn finalize(&self, session: &Arc<Session>, state: &mut LoginState, client: Arc<dyn AuthClient>) {
        let failed_step = state.step;
        let exported = unless_cancelled(session, client.export_portable_session()).await;
        drop(client);
        state.close_remote(session.user_id).await;

        // Whoever cancelled owns the teardown; nothing may be persisted now.
        let Some(exported) = exported.filter(|_| !session.is_cancelled()) else {
            info!(user_id = session.user_id.0, "login cancelled before the session was saved");
            return;
        };

        let persisted = match exported {
            Ok(s) if !s.is_empty() => self
                .repo
                .set_session(session.user_id, Some(s))
                .await
                .map_err(|e| short_description(&e.to_string())),
            Ok(_) => Err("the exported session was empty".to_string()),
            Err(e) => Err(describe(&e)),
        };

        match persisted {
            Ok(()) => {
                state.step = LoginStep::Complete;
                self.registry.retire(session, state).await;
                info!(user_id = session.user_id.0, "login complete, session saved");
                self.reporter
                    .report(session, LoginStep::Complete, SUCCESS)
                    .await;
                if let Err(e) = self
                    .messenger
                    .send_html(session.chat_id, KEYBOARD_CLOSED, ReplyMarkup::RemoveKeyboard)
                    .await
                {
                    warn!(user_id = session.user_id.0, error = %e, "failed to remove reply keyboard");
                }
            }
            Err(reason) => {
                warn!(user_id = session.user_id.0, "failed to save session");
                self.registry.retire(session, state).await;
                self.reporter
                    .report(
                        session,
                        failed_step,
                        &format!(
                            "<b>❌ Failed to save session: {reason} 😔</b>\n\nPlease try /login again."
                        ),
                    )
                    .await;
            }
        }
    }

    /// Run `op` under the animator, retrying exactly once after a rate limit.
    async fn call_with_retry<T, F, Fut>(
        &self,
        session: &Arc<Session>,
        state: &mut LoginState,
        step: LoginStep,
        mut op: F,
    ) -> Call<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AuthResult<T>>,
    {
        self.start_animation(session, state).await;
        let first = unless_cancelled(session, op()).await;
        state.stop_animator().await;

        let wait = match first {
            None => return Call::Cancelled,
            Some(Ok(v)) => return Call::Done(v),
            Some(Err(AuthError::RateLimited { wait })) => wait,
            Some(Err(e)) => return Call::Failed(e),
        };

        let delay = wait + self.timing.flood_buffer;
        warn!(
            user_id = session.user_id.0,
            step = step.as_str(),
            delay_secs = delay.as_secs(),
            "rate limited by remote, retrying once"
        );
        self.reporter
            .report(
                session,
                step,
                &format!(
                    "<b>⚠️ Rate limit hit. Retrying in {}s...</b>",
                    delay.as_secs()
                ),
            )
            .await;
        if unless_cancelled(session, sleep(delay)).await.is_none() {
            return Call::Cancelled;
        }

        self.start_animation(session, state).await;
        let second = unless_cancelled(session, op()).await;
        state.stop_animator().await;

        match second {
            None => Call::Cancelled,
            Some(Ok(v)) => Call::Done(v),
            Some(Err(e)) => Call::FailedAfterRetry(e),
        }
    }

    async fn start_animation(&self, session: &Arc<Session>, state: &mut LoginState) {
        state.stop_animator().await;
        state.animator = Some(self.animator.start(session.clone()));
    }

    async fn abandon(&self, session: &Arc<Session>, state: &mut LoginState, step: LoginStep, text: &str) {
        state.stop_animator().await;
        self.reporter.report(session, step, text).await;
        self.registry.retire(session, state).await;
    }

    async fn abandon_generic(
        &self,
        session: &Arc<Session>,
        state: &mut LoginState,
        step: LoginStep,
        e: &AuthError,
    ) {
        warn!(
            user_id = session.user_id.0,
            step = step.as_str(),
            error = %e,
            "login step failed"
        );
        let text = format!(
            "<b>❌ Something went wrong: {} 🤔 Please try /login again.</b>",
            describe(e)
        );
        self.abandon(session, state, step, &text).await;
    }
}

/// `None` when the session is cancelled before `fut` completes; `fut` is dropped.
async fn unless_cancelled<F: Future>(session: &Session, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = session.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Failure class plus a short, escaped detail.
fn describe(e: &AuthError) -> String {
    match e {
        AuthError::ConnectionFailure(detail) | AuthError::GenericRemoteFailure(detail)
            if !detail.trim().is_empty() =>
        {
            format!("{} ({})", e.class_label(), short_description(detail))
        }
        _ => e.class_label().to_string(),
    }
}

pub fn is_cancel_text(text: &str) -> bool {
    text.to_lowercase().contains(CANCEL_KEYWORD)
}

fn normalize_phone(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_valid_phone(phone: &str) -> bool {
    static PHONE_RE: OnceLock<Regex> = OnceLock::new();
    PHONE_RE
        .get_or_init(|| Regex::new(r"^\+[0-9]+$").expect("valid regex"))
        .is_match(phone)
}

fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_digit())
}
