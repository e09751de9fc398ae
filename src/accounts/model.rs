//! User record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Store-assigned user identifier.
pub type PrincipalId = u64;

/// Epoch every new account starts at.
pub const INITIAL_EPOCH: u64 = 1;

/// Authorization role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}' (expected 'admin' or 'user')")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A pending password reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetCode {
    pub code: String,
    /// Unix seconds.
    pub expires_at: u64,
}

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    /// PHC-format password hash.
    pub password_hash: String,
    #[serde(default)]
    pub full_name: String,
    /// Path of the avatar image, empty when none is set.
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub phone: String,
    pub role: Role,
    /// Session epoch. Only credentials carrying this exact value are valid.
    pub epoch: u64,
    #[serde(default)]
    pub reset_code: Option<ResetCode>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Unix seconds of a soft delete. Deleted records are invisible to
    /// lookups and free their email for reuse.
    #[serde(default)]
    pub deleted_at: Option<u64>,
}

impl Principal {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The client-facing view of this account.
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar: self.avatar.clone(),
            phone: self.phone.clone(),
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for [`UserStore::create`](super::store::UserStore::create).
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
}

/// Account fields safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: PrincipalId,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub phone: String,
    pub role: Role,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Profile fields a user may change about themselves. `None` or an empty
/// string leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Canonical form used for lookups and uniqueness.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("user".parse::<Role>(), Ok(Role::User));
        assert_eq!(
            "root".parse::<Role>(),
            Err(UnknownRole("root".to_string()))
        );
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_profile_omits_secrets() {
        let principal = Principal {
            id: 7,
            email: "a@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            full_name: "A".into(),
            avatar: "uploads/a.png".into(),
            phone: "0900".into(),
            role: Role::User,
            epoch: 3,
            reset_code: Some(ResetCode {
                code: "123456".into(),
                expires_at: 10,
            }),
            created_at: 1,
            updated_at: 2,
            deleted_at: None,
        };

        let json = serde_json::to_value(principal.profile()).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["avatar"], "uploads/a.png");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("deleted_at").is_none());
        assert!(json.get("epoch").is_none());
        assert!(json.get("reset_code").is_none());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}
