//! Rendering onto a session's status message.
//!
//! [`render_or_resend`] is shared by the reporter and the animator: edit the
//! current status message, and when that message is gone send a fresh one and
//! rebind the session to it.

use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    errors::MessagingError,
    messaging::{port::MessagingPort, types::ReplyMarkup},
    session::{LoginStep, Session},
};

/// Which edit failures fall back to sending a new message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fallback {
    /// Only when the message no longer exists.
    MissingMessage,
    /// On every failure except "not modified".
    AnyFailure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Edited,
    Unchanged,
    Resent,
    RateLimited(Duration),
    Failed(MessagingError),
}

pub(crate) async fn render_or_resend(
    api: &dyn MessagingPort,
    session: &Session,
    html: &str,
    fallback: Fallback,
) -> RenderOutcome {
    match api.edit_html(session.status_message(), html).await {
        Ok(()) => RenderOutcome::Edited,
        Err(MessagingError::NotModified) => RenderOutcome::Unchanged,
        Err(MessagingError::MessageInvalid) => resend(api, session, html).await,
        Err(_) if fallback == Fallback::AnyFailure => resend(api, session, html).await,
        Err(MessagingError::RateLimited(wait)) => RenderOutcome::RateLimited(wait),
        Err(e) => RenderOutcome::Failed(e),
    }
}

async fn resend(api: &dyn MessagingPort, session: &Session, html: &str) -> RenderOutcome {
    match api.send_html(session.chat_id, html, ReplyMarkup::None).await {
        Ok(msg) => {
            session.rebind_status(msg);
            RenderOutcome::Resent
        }
        Err(e) => RenderOutcome::Failed(e),
    }
}

const BAR_CELLS: usize = 10;

/// `███░░░░░░░ 30%`
pub fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = usize::from(percent) * BAR_CELLS / 100;
    format!(
        "{}{} {percent}%",
        "█".repeat(filled),
        "░".repeat(BAR_CELLS - filled)
    )
}

pub fn step_trail(step: LoginStep) -> &'static str {
    match step {
        LoginStep::WaitingPhone => "🟢 Phone Number → 🔵 Code → 🔵 Password",
        LoginStep::WaitingCode => "✅ Phone Number → 🟢 Code → 🔵 Password",
        LoginStep::WaitingPassword => "✅ Phone Number → ✅ Code → 🟢 Password",
        LoginStep::Complete => "✅ Phone Number → ✅ Code → ✅ Password",
    }
}

pub fn render_status(step: LoginStep, text: &str) -> String {
    format!(
        "<b>Progress: [{}]</b>\n<i>{}</i>\n\n{text}",
        progress_bar(step.percent()),
        step_trail(step)
    )
}

/// Renders step + progress bar + contextual text onto the status message.
///
/// Best-effort: failures are logged and never reach the state machine.
#[derive(Clone)]
pub struct ProgressReporter {
    messenger: Arc<dyn MessagingPort>,
}

impl ProgressReporter {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    pub async fn report(&self, session: &Session, step: LoginStep, text: &str) {
        session.touch();
        let html = render_status(step, text);
        match render_or_resend(&*self.messenger, session, &html, Fallback::AnyFailure).await {
            RenderOutcome::Failed(e) => {
                debug!(user_id = session.user_id.0, error = %e, "progress render failed (ignored)");
            }
            RenderOutcome::Resent => {
                debug!(user_id = session.user_id.0, "status message replaced");
            }
            _ => {}
        }
    }
}
