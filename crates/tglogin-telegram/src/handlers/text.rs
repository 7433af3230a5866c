use teloxide::prelude::*;
use tracing::warn;

use tglogin_core::messaging::types::ReplyMarkup;

use super::Ctx;

const NO_SESSION_HINT: &str = "No login in progress. Use /login to get started.";

pub(crate) async fn handle_text(ctx: Ctx, text: &str) -> ResponseResult<()> {
    if text.trim().is_empty() {
        return Ok(());
    }

    match ctx.state.flow.handle_text(ctx.user_id, text).await {
        Ok(true) => {}
        Ok(false) => {
            if let Err(e) = ctx
                .state
                .messenger
                .send_html(ctx.chat_id, NO_SESSION_HINT, ReplyMarkup::None)
                .await
            {
                warn!(user_id = ctx.user_id.0, error = %e, "failed to send hint");
            }
        }
        Err(e) => warn!(user_id = ctx.user_id.0, error = %e, "login step failed"),
    }
    Ok(())
}
