//! Login-bridge adapter (remote account authentication over HTTP).
//!
//! The bridge sidecar owns the MTProto connection; every [`BridgeAuthClient`]
//! maps to one bridge-side session created on `connect` and deleted on
//! `disconnect`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use tglogin_core::{
    auth::{AuthClient, AuthClientFactory, AuthResult},
    domain::UserId,
    errors::{AuthError, Error},
    Result,
};

/// Creates one unconnected bridge client per login attempt.
#[derive(Clone, Debug)]
pub struct BridgeAuthFactory {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
}

impl BridgeAuthFactory {
    pub fn new(
        base_url: impl Into<String>,
        api_id: i32,
        api_hash: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("bridge http client build error: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.into(),
        })
    }
}

impl AuthClientFactory for BridgeAuthFactory {
    fn create(&self, user_id: UserId) -> Arc<dyn AuthClient> {
        Arc::new(BridgeAuthClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            user_id,
            session_id: Mutex::new(None),
        })
    }
}

pub struct BridgeAuthClient {
    http: reqwest::Client,
    base_url: String,
    api_id: i32,
    api_hash: String,
    user_id: UserId,
    session_id: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct CreateSession<'a> {
    api_id: i32,
    api_hash: &'a str,
}

#[derive(Deserialize)]
struct Created {
    id: String,
}

#[derive(Serialize)]
struct SendCode<'a> {
    phone: &'a str,
}

#[derive(Deserialize)]
struct CodeSent {
    phone_code_hash: String,
}

#[derive(Serialize)]
struct SignIn<'a> {
    phone: &'a str,
    phone_code_hash: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
struct CheckPassword<'a> {
    password: &'a str,
}

#[derive(Deserialize)]
struct Exported {
    session_string: String,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

impl BridgeAuthClient {
    async fn session_url(&self, suffix: &str) -> AuthResult<String> {
        match self.session_id.lock().await.as_deref() {
            Some(id) => Ok(format!("{}/v1/sessions/{id}{suffix}", self.base_url)),
            None => Err(AuthError::ConnectionFailure("not connected".to_string())),
        }
    }

    async fn call<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> AuthResult<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| AuthError::ConnectionFailure(format!("bridge request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AuthError::GenericRemoteFailure(format!("bridge json error: {e}")))
    }
}

#[async_trait]
impl AuthClient for BridgeAuthClient {
    async fn connect(&self) -> AuthResult<()> {
        let req = self
            .http
            .post(format!("{}/v1/sessions", self.base_url))
            .json(&CreateSession {
                api_id: self.api_id,
                api_hash: &self.api_hash,
            });
        let created: Created = self.call(req).await?;
        debug!(user_id = self.user_id.0, "bridge session opened");
        *self.session_id.lock().await = Some(created.id);
        Ok(())
    }

    async fn request_code(&self, phone: &str) -> AuthResult<String> {
        let url = self.session_url("/code").await?;
        let sent: CodeSent = self
            .call(self.http.post(url).json(&SendCode { phone }))
            .await?;
        Ok(sent.phone_code_hash)
    }

    async fn verify_code(&self, phone: &str, code_hash: &str, code: &str) -> AuthResult<()> {
        let url = self.session_url("/sign-in").await?;
        let _: Empty = self
            .call(self.http.post(url).json(&SignIn {
                phone,
                phone_code_hash: code_hash,
                code,
            }))
            .await?;
        Ok(())
    }

    async fn verify_password(&self, password: &str) -> AuthResult<()> {
        let url = self.session_url("/password").await?;
        let _: Empty = self
            .call(self.http.post(url).json(&CheckPassword { password }))
            .await?;
        Ok(())
    }

    async fn export_portable_session(&self) -> AuthResult<String> {
        let url = self.session_url("/export").await?;
        let exported: Exported = self.call(self.http.get(url)).await?;
        Ok(exported.session_string)
    }

    async fn disconnect(&self) -> AuthResult<()> {
        let Some(id) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let resp = self
            .http
            .delete(format!("{}/v1/sessions/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| AuthError::ConnectionFailure(format!("bridge request error: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), &body));
        }
        debug!(user_id = self.user_id.0, "bridge session closed");
        Ok(())
    }
}

fn error_from_body(status: u16, body: &str) -> AuthError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => classify_rpc_error(&parsed.error, parsed.message.as_deref()),
        Err(_) => AuthError::GenericRemoteFailure(format!(
            "bridge returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )),
    }
}

/// Map a Telegram RPC error name (as relayed by the bridge) to an [`AuthError`].
pub fn classify_rpc_error(name: &str, message: Option<&str>) -> AuthError {
    let name = name.trim().to_ascii_uppercase();

    if let Some(secs) = name.strip_prefix("FLOOD_WAIT_") {
        if let Ok(secs) = secs.parse::<u64>() {
            return AuthError::RateLimited {
                wait: Duration::from_secs(secs),
            };
        }
    }

    match name.as_str() {
        "SESSION_PASSWORD_NEEDED" => AuthError::SecondFactorRequired,
        "PHONE_CODE_EXPIRED" => AuthError::Expired,
        "PASSWORD_HASH_INVALID" => AuthError::WrongCredential,
        n if n.starts_with("PHONE_CODE_") => AuthError::WrongCredential,
        n if n.starts_with("PHONE_NUMBER_") => AuthError::Validation,
        _ => AuthError::GenericRemoteFailure(match message {
            Some(m) if !m.trim().is_empty() => format!("{name}: {m}"),
            _ => name.clone(),
        }),
    }
}
