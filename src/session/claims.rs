use serde::{Deserialize, Serialize};

use crate::accounts::model::{PrincipalId, Role};

/// Payload of a short-lived access credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: PrincipalId,
    pub role: Role,
    pub epoch: u64,
    pub iat: u64,
    pub exp: u64,
}

/// Payload of a long-lived refresh credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: PrincipalId,
    pub epoch: u64,
    pub iat: u64,
    pub exp: u64,
}

/// Either payload, tagged by `token_type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "token_type", rename_all = "lowercase")]
pub enum Claims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl Claims {
    pub fn exp(&self) -> u64 {
        match self {
            Claims::Access(c) => c.exp,
            Claims::Refresh(c) => c.exp,
        }
    }
}
