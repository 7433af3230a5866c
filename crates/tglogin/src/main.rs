use std::sync::Arc;

use teloxide::Bot;
use tracing::info;

use tglogin_bridge::BridgeAuthFactory;
use tglogin_core::{
    config::Config, login::LoginFlow, session::SessionRegistry, store::JsonFileSessionStore,
};

#[tokio::main]
async fn main() -> Result<(), tglogin_core::Error> {
    tglogin_core::logging::init("tglogin")?;

    let cfg = Config::load()?;
    info!(
        bridge = %cfg.auth_bridge_url,
        store = %cfg.session_store_path.display(),
        "configuration loaded"
    );

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let messenger = tglogin_telegram::router::build_messenger(bot.clone());

    let auth = Arc::new(BridgeAuthFactory::new(
        cfg.auth_bridge_url.clone(),
        cfg.telegram_api_id,
        cfg.telegram_api_hash.clone(),
        cfg.auth_bridge_timeout,
    )?);
    let store = Arc::new(JsonFileSessionStore::new(cfg.session_store_path.clone()));

    let flow = Arc::new(LoginFlow::new(
        Arc::new(SessionRegistry::new()),
        store,
        auth,
        messenger.clone(),
        cfg.timing,
    ));

    tglogin_telegram::router::run_polling(bot, flow, messenger)
        .await
        .map_err(|e| tglogin_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
