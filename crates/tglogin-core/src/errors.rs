use std::time::Duration;

/// Core error type for the login bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// decide between "tell the user" and "swallow and log".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome classes of the status-message channel (edit / send).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MessagingError {
    /// The edit carried the same content the message already has.
    #[error("message is not modified")]
    NotModified,

    /// The target message no longer exists (deleted, or id unknown).
    #[error("message to edit is invalid or gone")]
    MessageInvalid,

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("{0}")]
    Other(String),
}

/// Closed set of outcomes the remote auth platform can signal.
///
/// Call sites switch on the kind instead of inspecting library-specific errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Malformed input rejected by the platform (e.g. an unknown phone number).
    #[error("invalid input")]
    Validation,

    #[error("rate limited for {wait:?}")]
    RateLimited { wait: Duration },

    #[error("wrong code or password")]
    WrongCredential,

    /// Not a failure: the account has a second-factor password.
    #[error("second factor required")]
    SecondFactorRequired,

    #[error("code expired")]
    Expired,

    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    #[error("remote failure: {0}")]
    GenericRemoteFailure(String),
}

impl AuthError {
    /// Short, user-presentable name of the failure class.
    pub fn class_label(&self) -> &'static str {
        match self {
            AuthError::Validation => "invalid input",
            AuthError::RateLimited { .. } => "rate limited",
            AuthError::WrongCredential => "wrong credential",
            AuthError::SecondFactorRequired => "second factor required",
            AuthError::Expired => "expired",
            AuthError::ConnectionFailure(_) => "connection failure",
            AuthError::GenericRemoteFailure(_) => "remote failure",
        }
    }
}
