//! Telegram adapter (teloxide).
//!
//! This crate implements the `tglogin-core` MessagingPort over Telegram Bot API
//! and hosts the polling dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use tglogin_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::MessagingError,
    messaging::{
        port::{MessagingPort, SendResult},
        types::{ReplyMarkup, CANCEL_BUTTON_LABEL},
    },
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    /// Sends only: one retry after a `RetryAfter`.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> SendResult<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(e) => return Err(classify_error(&e)),
            }
        }
    }
}

/// Map a Bot API failure onto the status-message outcome classes.
pub fn classify_error(e: &RequestError) -> MessagingError {
    match e {
        RequestError::Api(ApiError::MessageNotModified) => MessagingError::NotModified,
        RequestError::Api(ApiError::MessageIdInvalid | ApiError::MessageToEditNotFound) => {
            MessagingError::MessageInvalid
        }
        RequestError::RetryAfter(d) => MessagingError::RateLimited(*d),
        other => MessagingError::Other(format!("telegram error: {other}")),
    }
}

fn cancel_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(CANCEL_BUTTON_LABEL)]]).resize_keyboard(true)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        markup: ReplyMarkup,
    ) -> SendResult<MessageRef> {
        let msg = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                match markup {
                    ReplyMarkup::None => req,
                    ReplyMarkup::CancelKeyboard => req.reply_markup(cancel_keyboard()),
                    ReplyMarkup::RemoveKeyboard => req.reply_markup(KeyboardRemove::new()),
                }
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> SendResult<()> {
        self.bot
            .edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                html.to_string(),
            )
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(())
    }
}
