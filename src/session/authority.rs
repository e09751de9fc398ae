use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::claims::{AccessClaims, Claims, RefreshClaims};
use super::codec::TokenCodec;
use super::error::SessionError;
use crate::accounts::model::{PrincipalId, Role};
use crate::accounts::store::UserStore;
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::observability::metrics;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
}

/// Issues, verifies and revokes session credentials.
pub struct SessionAuthority {
    codec: TokenCodec,
    access_ttl: Duration,
    refresh_ttl: Duration,
    bind_refresh_to_epoch: bool,
    clock: Arc<dyn Clock>,
}

impl SessionAuthority {
    pub fn new(config: &SessionConfig, clock: Arc<dyn Clock>) -> Result<Self, SessionError> {
        Ok(Self {
            codec: TokenCodec::new(config.secret.as_bytes())?,
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            bind_refresh_to_epoch: config.bind_refresh_to_epoch,
            clock,
        })
    }

    /// Mint a pair bound to `epoch`.
    pub fn issue(
        &self,
        principal_id: PrincipalId,
        role: Role,
        epoch: u64,
    ) -> Result<CredentialPair, SessionError> {
        let now = self.clock.unix_secs();

        let access = Claims::Access(AccessClaims {
            sub: principal_id,
            role,
            epoch,
            iat: now,
            exp: now + self.access_ttl.as_secs(),
        });
        let refresh = Claims::Refresh(RefreshClaims {
            sub: principal_id,
            epoch,
            iat: now,
            exp: now + self.refresh_ttl.as_secs(),
        });

        Ok(CredentialPair {
            access_token: self.codec.encode(&access)?,
            refresh_token: self.codec.encode(&refresh)?,
            expires_in: self.access_ttl.as_secs(),
        })
    }

    /// Check signature, expiry and type of an access credential.
    ///
    /// Revocation is not visible here; the gateway compares the epoch
    /// against the store.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, SessionError> {
        match self.decode_live(token)? {
            Claims::Access(claims) => Ok(claims),
            Claims::Refresh(_) => Err(SessionError::WrongType),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, SessionError> {
        match self.decode_live(token)? {
            Claims::Refresh(claims) => Ok(claims),
            Claims::Access(_) => Err(SessionError::WrongType),
        }
    }

    fn decode_live(&self, token: &str) -> Result<Claims, SessionError> {
        let claims = self.codec.decode(token)?;
        if self.clock.unix_secs() >= claims.exp() {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    /// Exchange a refresh credential for a new pair.
    ///
    /// The new pair always carries the role and epoch currently stored.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        store: &dyn UserStore,
    ) -> Result<CredentialPair, SessionError> {
        let claims = self.verify_refresh(refresh_token)?;
        let principal = store.find_by_id(claims.sub).await?;

        if self.bind_refresh_to_epoch && claims.epoch != principal.epoch {
            return Err(SessionError::EpochMismatch);
        }

        self.issue(principal.id, principal.role, principal.epoch)
    }

    /// Invalidate every credential issued to `principal_id` so far.
    ///
    /// Returns the new epoch.
    pub async fn revoke(
        &self,
        principal_id: PrincipalId,
        store: &dyn UserStore,
    ) -> Result<u64, SessionError> {
        let epoch = store.bump_epoch(principal_id).await?;
        metrics::record_revocation();
        tracing::info!(principal_id, epoch, "Sessions revoked");
        Ok(epoch)
    }
}
