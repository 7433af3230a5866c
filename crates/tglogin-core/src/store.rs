//! Durable storage of finalized portable session strings.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::UserId, errors::Error, Result};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, user_id: UserId) -> Result<Option<String>>;

    /// `None` clears the stored session.
    async fn set_session(&self, user_id: UserId, session: Option<String>) -> Result<()>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredSession {
    session: String,
    saved_at: String,
}

/// All sessions in one JSON object keyed by user id.
///
/// Writes go through a temp file + rename so a crash never leaves a half
/// written store behind.
pub struct JsonFileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, StoredSession>> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&txt)?)
    }

    async fn save(&self, data: &BTreeMap<String, StoredSession>) -> Result<()> {
        let txt = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for JsonFileSessionStore {
    async fn get_session(&self, user_id: UserId) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let data = self.load().await.map_err(persistence)?;
        Ok(data
            .get(&user_id.to_string())
            .map(|s| s.session.clone())
            .filter(|s| !s.is_empty()))
    }

    async fn set_session(&self, user_id: UserId, session: Option<String>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await.map_err(persistence)?;
        let key = user_id.to_string();
        match session {
            Some(session) => {
                data.insert(
                    key,
                    StoredSession {
                        session,
                        saved_at: Utc::now().to_rfc3339(),
                    },
                );
            }
            None => {
                if data.remove(&key).is_none() {
                    return Ok(());
                }
            }
        }
        self.save(&data).await.map_err(persistence)
    }
}

fn persistence(e: Error) -> Error {
    match e {
        Error::Persistence(_) => e,
        other => Error::Persistence(other.to_string()),
    }
}
