use teloxide::prelude::*;
use tracing::{debug, warn};

use tglogin_core::{login::StartOutcome, messaging::types::ReplyMarkup};

use super::Ctx;

const USAGE: &str = "<b>🔐 Account Login Bot</b>\n\n\
Use /login to connect your Telegram account step by step: phone number, \
verification code and, if enabled, your two-step password. \
Send /cancel at any time to stop, and /logout to clear a saved session.";

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

const COMMANDS: [&str; 6] = ["login", "logout", "cancel", "cancellogin", "start", "help"];

fn is_known_command(cmd: &str) -> bool {
    COMMANDS.contains(&cmd)
}

/// Whether `text` goes to command dispatch rather than the login flow.
///
/// With a login in progress, slash-prefixed text that is not one of our
/// commands is step input (a password may well start with `/`).
pub(crate) fn routes_to_command(text: &str, has_session: bool) -> bool {
    if !text.trim_start().starts_with('/') {
        return false;
    }
    !has_session || is_known_command(&parse_command(text).0)
}

pub(crate) async fn handle_command(ctx: Ctx, text: &str) -> ResponseResult<()> {
    let (cmd, _args) = parse_command(text);
    let flow = &ctx.state.flow;

    let result = match cmd.as_str() {
        "login" => flow.start_login(ctx.user_id, ctx.chat_id).await.map(|outcome| {
            if outcome != StartOutcome::Started {
                debug!(user_id = ctx.user_id.0, ?outcome, "login not started");
            }
        }),
        "logout" => flow.logout(ctx.user_id, ctx.chat_id).await,
        "cancel" | "cancellogin" => flow.cancel_login(ctx.user_id, ctx.chat_id).await.map(|_| ()),
        "start" | "help" => reply(&ctx, USAGE).await,
        _ => reply(&ctx, "Unknown command. Use /help to see what I can do.").await,
    };

    if let Err(e) = result {
        warn!(user_id = ctx.user_id.0, command = %cmd, error = %e, "command failed");
    }
    Ok(())
}

async fn reply(ctx: &Ctx, html: &str) -> tglogin_core::Result<()> {
    ctx.state
        .messenger
        .send_html(ctx.chat_id, html, ReplyMarkup::None)
        .await?;
    Ok(())
}
