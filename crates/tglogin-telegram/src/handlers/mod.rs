//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - maps teloxide ids onto core domain ids
//! - calls into the `tglogin-core` login flow
//! - logs (never propagates) flow errors so the dispatcher keeps running

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use tglogin_core::{
    domain::{ChatId, UserId},
    messaging::types::ReplyMarkup,
};

use crate::router::AppState;

mod commands;
mod text;

const TEXT_ONLY: &str = "Please send text only. Use /help for usage.";

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Login codes and passwords never belong in a group chat.
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };

    let ctx = Ctx {
        user_id: UserId(user.id.0 as i64),
        chat_id: ChatId(msg.chat.id.0),
        state,
    };

    let Some(text) = msg.text() else {
        if let Err(e) = ctx
            .state
            .messenger
            .send_html(ctx.chat_id, TEXT_ONLY, ReplyMarkup::None)
            .await
        {
            warn!(user_id = ctx.user_id.0, error = %e, "failed to send text-only hint");
        }
        return Ok(());
    };

    // Session first: mid-login, only real commands leave the state machine.
    let has_session = ctx.state.flow.has_active_session(ctx.user_id).await;
    if commands::routes_to_command(text, has_session) {
        return commands::handle_command(ctx, text).await;
    }
    text::handle_text(ctx, text).await
}

/// What every handler needs about the incoming message.
pub(crate) struct Ctx {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub state: Arc<AppState>,
}
