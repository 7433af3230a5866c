use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the login bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_api_id: i32,
    pub telegram_api_hash: String,

    // Login bridge
    pub auth_bridge_url: String,
    pub auth_bridge_timeout: Duration,

    // Durable sessions
    pub session_store_path: PathBuf,

    // Login flow timing
    pub timing: LoginTiming,
}

/// Timing knobs of the login flow.
///
/// Kept separate from [`Config`] so the state machine, sweeper and animator can
/// be built in tests without touching the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginTiming {
    /// Sessions idle for longer than this are evicted by the sweeper.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Cadence of the "connecting" animation frames.
    pub frame_interval: Duration,
    /// Added on top of every platform-mandated rate-limit wait.
    pub flood_buffer: Duration,
}

impl Default for LoginTiming {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            frame_interval: Duration::from_secs(2),
            flood_buffer: Duration::from_secs(2),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let telegram_api_hash = required("TELEGRAM_API_HASH")?;
        let telegram_api_id = required("TELEGRAM_API_ID")?
            .trim()
            .parse::<i32>()
            .map_err(|e| Error::Config(format!("TELEGRAM_API_ID must be an integer: {e}")))?;

        let auth_bridge_url = env_str("AUTH_BRIDGE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "http://127.0.0.1:8090".to_string())
            .trim_end_matches('/')
            .to_string();
        let auth_bridge_timeout =
            Duration::from_millis(env_u64("AUTH_BRIDGE_TIMEOUT_MS").unwrap_or(30_000));

        let session_store_path = env_path("SESSION_STORE_PATH")
            .unwrap_or_else(|| PathBuf::from("/tmp/tglogin-sessions.json"));

        let defaults = LoginTiming::default();
        let timing = LoginTiming {
            idle_timeout: env_u64("LOGIN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            sweep_interval: env_u64("LOGIN_SWEEP_INTERVAL_SECS")
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            frame_interval: env_u64("ANIMATION_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_interval),
            flood_buffer: env_u64("FLOOD_WAIT_BUFFER_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.flood_buffer),
        };

        Ok(Self {
            telegram_bot_token,
            telegram_api_id,
            telegram_api_hash,
            auth_bridge_url,
            auth_bridge_timeout,
            session_store_path,
            timing,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
