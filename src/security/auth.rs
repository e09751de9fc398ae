//! Request-time authentication and role gating.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::accounts::{PrincipalId, Role, UserStore};
use crate::http::error::ApiError;
use crate::observability::metrics;
use crate::session::{SessionAuthority, SessionError};

/// Identity attached to authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub principal_id: PrincipalId,
    pub role: Role,
}

impl AuthContext {
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed.contains(&self.role)
    }

    /// `Forbidden` unless the caller holds one of `allowed`.
    pub fn require_any(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if self.has_any_role(allowed) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// Why a request was not authenticated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("missing authorization header")]
    MissingCredentials,
    #[error("authorization scheme is not Bearer")]
    UnsupportedScheme,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl AuthRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingCredentials => "missing",
            AuthRejection::UnsupportedScheme => "scheme",
            AuthRejection::Session(e) => e.reason(),
        }
    }

    /// Every cause looks the same to the client, except a store outage.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            AuthRejection::Session(SessionError::Store(_)) => ApiError::Internal,
            _ => ApiError::Unauthorized,
        }
    }
}

/// Verifies bearer credentials and checks them against the stored epoch.
pub struct AuthGateway {
    sessions: Arc<SessionAuthority>,
    store: Arc<dyn UserStore>,
}

impl AuthGateway {
    pub fn new(sessions: Arc<SessionAuthority>, store: Arc<dyn UserStore>) -> Self {
        Self { sessions, store }
    }

    /// Authenticate the value of an `Authorization` header.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthContext, AuthRejection> {
        let value = authorization.ok_or(AuthRejection::MissingCredentials)?;
        let token = bearer_token(value).ok_or(AuthRejection::UnsupportedScheme)?;

        let claims = self.sessions.verify_access(token)?;
        let principal = self
            .store
            .find_by_id(claims.sub)
            .await
            .map_err(SessionError::from)?;

        if principal.epoch != claims.epoch {
            return Err(SessionError::EpochMismatch.into());
        }

        // The stored role is authoritative; the claim only mirrors it.
        Ok(AuthContext {
            principal_id: principal.id,
            role: principal.role,
        })
    }
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Reject unauthenticated requests; attach [`AuthContext`] otherwise.
pub async fn require_auth(
    State(gateway): State<Arc<AuthGateway>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match gateway.authenticate(authorization).await {
        Ok(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Err(rejection) => {
            tracing::debug!(reason = rejection.reason(), "Authentication rejected");
            metrics::record_auth_rejection(rejection.reason());
            rejection.to_api_error().into_response()
        }
    }
}

/// Reject callers whose role is not in the allowed set.
///
/// Must run after [`require_auth`].
pub async fn require_role(
    State(allowed): State<&'static [Role]>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ctx) = request.extensions().get::<AuthContext>().copied() else {
        return ApiError::Unauthorized.into_response();
    };

    match ctx.require_any(allowed) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::debug!(
                principal_id = ctx.principal_id,
                role = %ctx.role,
                "Role not permitted"
            );
            e.into_response()
        }
    }
}
