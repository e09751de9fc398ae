use crate::accounts::store::StoreError;

/// Why a credential was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("credential is malformed")]
    Malformed,
    #[error("credential signature is invalid")]
    InvalidSignature,
    #[error("credential has expired")]
    Expired,
    #[error("credential is of the wrong type")]
    WrongType,
    #[error("credential was revoked")]
    EpochMismatch,
    #[error("credential subject no longer exists")]
    UnknownPrincipal,
    #[error("failed to encode credential: {0}")]
    Encoding(String),
    #[error(transparent)]
    Store(StoreError),
}

impl SessionError {
    /// Short label for logs and the `auth_rejections_total` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::Malformed => "malformed",
            SessionError::InvalidSignature => "invalid_signature",
            SessionError::Expired => "expired",
            SessionError::WrongType => "wrong_type",
            SessionError::EpochMismatch => "revoked",
            SessionError::UnknownPrincipal => "unknown_principal",
            SessionError::Encoding(_) => "encoding",
            SessionError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SessionError::UnknownPrincipal,
            other => SessionError::Store(other),
        }
    }
}
