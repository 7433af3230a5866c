use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{Update, UpdateKind},
};
use tracing::{info, warn};

use tglogin_core::messaging::port::MessagingPort;
use tglogin_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use tglogin_core::login::{is_cancel_text, LoginFlow};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<LoginFlow>,
    pub messenger: Arc<dyn MessagingPort>,
}

/// The messenger stack the login flow should render through.
///
/// The throttling decorator spaces the animator's steady edits; sends still get
/// one `RetryAfter` retry inside the Telegram adapter.
pub fn build_messenger(bot: Bot) -> Arc<dyn MessagingPort> {
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot));
    Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ))
}

/// Which dispatcher queue an update joins.
///
/// Updates of one chat stay ordered, except cancel requests: they get a lane of
/// their own so they are never stuck behind a login step awaiting the remote.
fn distribution_key(update: &Update) -> Option<(teloxide::types::ChatId, bool)> {
    let chat_id = update.chat()?.id;
    let cancel = match &update.kind {
        UpdateKind::Message(msg) => msg.text().is_some_and(is_cancel_text),
        _ => false,
    };
    Some((chat_id, cancel))
}

pub async fn run_polling(
    bot: Bot,
    flow: Arc<LoginFlow>,
    messenger: Arc<dyn MessagingPort>,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "login bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }

    let state = Arc::new(AppState {
        flow: flow.clone(),
        messenger,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(distribution_key)
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped, tearing down login sessions");
    flow.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tglogin_core::messaging::types::CANCEL_BUTTON_LABEL;

    #[test]
    fn cancel_commands_and_button_take_the_cancel_lane() {
        assert!(is_cancel_text("/cancel"));
        assert!(is_cancel_text("/cancellogin@my_login_bot"));
        assert!(is_cancel_text(CANCEL_BUTTON_LABEL));
        assert!(!is_cancel_text("/login"));
        assert!(!is_cancel_text("12 345"));
    }
}
