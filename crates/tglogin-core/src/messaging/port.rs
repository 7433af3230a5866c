use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    errors::MessagingError,
    messaging::types::ReplyMarkup,
};

pub type SendResult<T> = std::result::Result<T, MessagingError>;

/// Hexagonal port for the chat the login flow talks through.
///
/// Only the two primitives the status message needs are exposed; both report
/// failures as a [`MessagingError`] class so callers can pick a policy per class.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(
        &self,
        chat_id: ChatId,
        html: &str,
        markup: ReplyMarkup,
    ) -> SendResult<MessageRef>;

    async fn edit_html(&self, msg: MessageRef, html: &str) -> SendResult<()>;
}
