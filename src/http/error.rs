//! JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::accounts::AccountError;
use crate::session::SessionError;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub err_code: String,
    pub message: String,
}

/// Errors a handler or middleware can answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    TooManyRequests,
    UserNotFound,
    EmailExists,
    InvalidCredentials,
    WrongPassword,
    InvalidOtp,
    OtpExpired,
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::WrongPassword
            | ApiError::InvalidOtp
            | ApiError::OtpExpired => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UserNotFound => StatusCode::NOT_FOUND,
            ApiError::EmailExists => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "ERR_BAD_REQUEST",
            ApiError::Unauthorized => "ERR_UNAUTHORIZED",
            ApiError::Forbidden => "ERR_FORBIDDEN",
            ApiError::TooManyRequests => "ERR_TOO_MANY_REQUESTS",
            ApiError::UserNotFound => "ERR_USER_NOT_FOUND",
            ApiError::EmailExists => "ERR_EMAIL_EXISTS",
            ApiError::InvalidCredentials => "ERR_INVALID_CREDENTIALS",
            ApiError::WrongPassword => "ERR_WRONG_PASSWORD",
            ApiError::InvalidOtp => "ERR_INVALID_OTP",
            ApiError::OtpExpired => "ERR_OTP_EXPIRED",
            ApiError::Internal => "ERR_INTERNAL_SERVER",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized => "authentication required or session expired".into(),
            ApiError::Forbidden => "you are not allowed to perform this action".into(),
            ApiError::TooManyRequests => "too many requests, please retry later".into(),
            ApiError::UserNotFound => "user not found".into(),
            ApiError::EmailExists => "email is already registered".into(),
            ApiError::InvalidCredentials => "invalid email or password".into(),
            ApiError::WrongPassword => "current password is incorrect".into(),
            ApiError::InvalidOtp => "reset code is invalid".into(),
            ApiError::OtpExpired => "reset code has expired".into(),
            ApiError::Internal => "internal server error, please retry later".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            err_code: self.code().to_string(),
            message: self.message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(_) | SessionError::Encoding(_) => ApiError::Internal,
            _ => ApiError::Unauthorized,
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::EmailTaken => ApiError::EmailExists,
            AccountError::InvalidCredentials => ApiError::InvalidCredentials,
            AccountError::WrongPassword => ApiError::WrongPassword,
            AccountError::InvalidResetCode => ApiError::InvalidOtp,
            AccountError::ResetCodeExpired => ApiError::OtpExpired,
            AccountError::InvalidRole(role) => ApiError::BadRequest(format!("invalid role '{role}'")),
            AccountError::NotFound => ApiError::UserNotFound,
            AccountError::Validation(msg) => ApiError::BadRequest(msg),
            AccountError::Session(e) => e.into(),
            AccountError::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                ApiError::Internal
            }
            AccountError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                ApiError::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::StoreError;

    #[test]
    fn test_session_failures_collapse_to_unauthorized() {
        for err in [
            SessionError::Malformed,
            SessionError::InvalidSignature,
            SessionError::Expired,
            SessionError::WrongType,
            SessionError::EpochMismatch,
            SessionError::UnknownPrincipal,
        ] {
            assert_eq!(ApiError::from(err), ApiError::Unauthorized);
        }
        assert_eq!(
            ApiError::from(SessionError::Store(StoreError::Unavailable("down".into()))),
            ApiError::Internal
        );
    }

    #[test]
    fn test_account_errors_map_to_codes() {
        assert_eq!(ApiError::from(AccountError::EmailTaken).code(), "ERR_EMAIL_EXISTS");
        assert_eq!(ApiError::from(AccountError::ResetCodeExpired).code(), "ERR_OTP_EXPIRED");
        assert_eq!(
            ApiError::from(AccountError::Validation("bad".into())),
            ApiError::BadRequest("bad".into())
        );
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ApiError::TooManyRequests.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.err_code, "ERR_TOO_MANY_REQUESTS");
    }
}
