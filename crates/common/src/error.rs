use thiserror::Error;

/// Failure taxonomy shared by every bridge component.
///
/// The variants map onto how the caller reacts, not onto where the failure
/// happened: `AuthExpired` triggers a re-login, `Network` is retried with
/// backoff, `NotFound` is skipped, `Transcode` keeps the last good output and
/// `ProcessCrash` goes through the publisher's restart policy.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("vendor session expired or was rejected")]
    AuthExpired,

    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transcode failed: {0}")]
    Transcode(String),

    #[error("media server process crashed: {0}")]
    ProcessCrash(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("credential store: {0}")]
    CredentialStore(String),

    #[error("verification code required")]
    VerificationRequired,

    #[error("unexpected vendor response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Only transient network failures are worth retrying in place.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, BridgeError::AuthExpired)
    }

    /// Errors that should abort startup instead of being logged per camera.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Config(_) | BridgeError::CredentialStore(_))
    }
}

/// `std::io::Error` is not `Clone`; the copy keeps its kind and message.
impl Clone for BridgeError {
    fn clone(&self) -> Self {
        match self {
            Self::AuthExpired => Self::AuthExpired,
            Self::Network(m) => Self::Network(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::Transcode(m) => Self::Transcode(m.clone()),
            Self::ProcessCrash(m) => Self::ProcessCrash(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::CredentialStore(m) => Self::CredentialStore(m.clone()),
            Self::VerificationRequired => Self::VerificationRequired,
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
