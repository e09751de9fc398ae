use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use subtle::ConstantTimeEq;

use super::avatar::AvatarFiles;
use super::listing::{ListQuery, Listing, Page};
use super::model::{NewPrincipal, Principal, PrincipalId, Profile, ProfileUpdate, ResetCode, Role};
use super::otp;
use super::password::{self, PasswordError};
use super::store::{StoreError, UserStore};
use crate::clock::Clock;
use crate::mail::{self, templates, MailTransport};
use crate::observability::metrics;
use crate::session::{CredentialPair, SessionAuthority, SessionError};
use crate::tasks::TaskPool;

/// Shortest password accepted on register, change and reset.
pub const MIN_PASSWORD_LEN: usize = 6;

/// How long a password reset code stays valid.
pub const RESET_CODE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("current password is incorrect")]
    WrongPassword,
    #[error("reset code is invalid")]
    InvalidResetCode,
    #[error("reset code has expired")]
    ResetCodeExpired,
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("user not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AccountError::NotFound,
            StoreError::Conflict => AccountError::EmailTaken,
            other => AccountError::Store(other),
        }
    }
}

/// Account flows built on the store, the session authority and the pool.
pub struct AccountService {
    store: Arc<dyn UserStore>,
    sessions: Arc<SessionAuthority>,
    tasks: TaskPool,
    mailer: Arc<dyn MailTransport>,
    avatars: AvatarFiles,
    clock: Arc<dyn Clock>,
    public_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn UserStore>,
        sessions: Arc<SessionAuthority>,
        tasks: TaskPool,
        mailer: Arc<dyn MailTransport>,
        avatars: AvatarFiles,
        clock: Arc<dyn Clock>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sessions,
            tasks,
            mailer,
            avatars,
            clock,
            public_url: public_url.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionAuthority> {
        &self.sessions
    }

    /// Create a `user` account at the initial epoch and queue a welcome mail.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Profile, AccountError> {
        validate_email(email)?;
        validate_password(password)?;

        let password_hash = hash_blocking(password.to_string()).await?;
        let id = self
            .store
            .create(NewPrincipal {
                email: email.to_string(),
                password_hash,
                full_name: full_name.trim().to_string(),
                role: Role::User,
            })
            .await?;
        let principal = self.store.find_by_id(id).await?;

        tracing::info!(principal_id = id, "Account registered");

        // Losing a welcome mail is not worth failing the registration.
        let _ = mail::deliver_later(
            &self.tasks,
            self.mailer.clone(),
            principal.email.clone(),
            templates::welcome(&principal.full_name, &self.public_url),
        );

        Ok(principal.profile())
    }

    /// Check credentials and issue a pair at the stored epoch.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair, AccountError> {
        let principal = match self.store.find_by_email(email).await {
            Ok(p) => p,
            Err(StoreError::NotFound) => return Err(AccountError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        match verify_blocking(password.to_string(), principal.password_hash.clone()).await {
            Ok(()) => {}
            Err(PasswordError::Mismatch) => return Err(AccountError::InvalidCredentials),
            Err(e) => return Err(AccountError::Internal(e.to_string())),
        }

        tracing::info!(principal_id = principal.id, "Login succeeded");
        Ok(self
            .sessions
            .issue(principal.id, principal.role, principal.epoch)?)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, AccountError> {
        Ok(self
            .sessions
            .refresh(refresh_token, self.store.as_ref())
            .await?)
    }

    /// Revoke every outstanding credential for `id`.
    pub async fn logout(&self, id: PrincipalId) -> Result<u64, AccountError> {
        Ok(self.sessions.revoke(id, self.store.as_ref()).await?)
    }

    pub async fn profile(&self, id: PrincipalId) -> Result<Profile, AccountError> {
        Ok(self.store.find_by_id(id).await?.profile())
    }

    /// Apply a self-service profile edit. A replaced avatar file is removed
    /// in the background.
    pub async fn update_profile(
        &self,
        id: PrincipalId,
        update: ProfileUpdate,
    ) -> Result<Profile, AccountError> {
        let full_name = non_empty(update.full_name);
        let avatar = non_empty(update.avatar);
        let phone = non_empty(update.phone);

        let replaced = Arc::new(Mutex::new(None));
        let slot = replaced.clone();
        let updated = self
            .store
            .update_with(
                id,
                Box::new(move |p: &mut Principal| {
                    if let Some(full_name) = full_name {
                        p.full_name = full_name;
                    }
                    if let Some(phone) = phone {
                        p.phone = phone;
                    }
                    if let Some(avatar) = avatar {
                        if avatar != p.avatar {
                            let old = std::mem::replace(&mut p.avatar, avatar);
                            if let Ok(mut slot) = slot.lock() {
                                *slot = Some(old);
                            }
                        }
                    }
                }),
            )
            .await?;

        let old_avatar = replaced.lock().ok().and_then(|mut slot| slot.take());
        if let Some(old) = old_avatar {
            let _ = self.avatars.remove_later(&self.tasks, &old);
        }

        tracing::info!(principal_id = id, "Profile updated");
        Ok(updated.profile())
    }

    /// One page of live accounts for the admin listing.
    pub async fn list_users(&self, query: &ListQuery) -> Result<Listing<Profile>, AccountError> {
        let page = self.store.list(query).await?;
        let page = Page {
            items: page.items.iter().map(Principal::profile).collect(),
            total: page.total,
        };
        Ok(Listing::new(page, query))
    }

    /// Soft-delete an account. Its sessions die and its email frees up; the
    /// record and avatar file stay until purged.
    pub async fn delete_user(&self, id: PrincipalId) -> Result<(), AccountError> {
        let deleted = self.store.soft_delete(id).await?;
        metrics::record_revocation();
        tracing::info!(principal_id = id, epoch = deleted.epoch, "Account deleted");
        Ok(())
    }

    /// Remove an account for good, deleted or not, and queue its avatar file
    /// for removal.
    pub async fn purge_user(&self, id: PrincipalId) -> Result<(), AccountError> {
        let purged = self.store.purge(id).await?;
        if !purged.avatar.is_empty() {
            let _ = self.avatars.remove_later(&self.tasks, &purged.avatar);
        }
        tracing::info!(principal_id = id, "Account purged");
        Ok(())
    }

    /// Replace the password and revoke sessions in one store update.
    pub async fn change_password(
        &self,
        id: PrincipalId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        validate_password(new_password)?;

        let principal = self.store.find_by_id(id).await?;
        match verify_blocking(old_password.to_string(), principal.password_hash).await {
            Ok(()) => {}
            Err(PasswordError::Mismatch) => return Err(AccountError::WrongPassword),
            Err(e) => return Err(AccountError::Internal(e.to_string())),
        }

        let new_hash = hash_blocking(new_password.to_string()).await?;
        let updated = self
            .store
            .update_with(
                id,
                Box::new(move |p: &mut Principal| {
                    p.password_hash = new_hash;
                    p.epoch += 1;
                }),
            )
            .await?;

        metrics::record_revocation();
        tracing::info!(principal_id = id, epoch = updated.epoch, "Password changed");
        Ok(())
    }

    /// Assign a role and revoke the target's sessions.
    pub async fn set_role(&self, id: PrincipalId, role: &str) -> Result<Profile, AccountError> {
        let role: Role = role
            .parse()
            .map_err(|_| AccountError::InvalidRole(role.to_string()))?;

        let updated = self
            .store
            .update_with(
                id,
                Box::new(move |p: &mut Principal| {
                    p.role = role;
                    p.epoch += 1;
                }),
            )
            .await?;

        metrics::record_revocation();
        tracing::info!(
            principal_id = id,
            role = %role,
            epoch = updated.epoch,
            "Role updated"
        );
        Ok(updated.profile())
    }

    /// Store a fresh reset code and queue it by mail.
    ///
    /// Succeeds for unknown addresses too, so callers cannot learn which
    /// emails are registered.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AccountError> {
        let principal = match self.store.find_by_email(email).await {
            Ok(p) => p,
            Err(StoreError::NotFound) => {
                tracing::debug!("Reset requested for unknown email");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let code = otp::generate_code();
        let expires_at = self.clock.unix_secs() + RESET_CODE_TTL.as_secs();
        let stored = ResetCode {
            code: code.clone(),
            expires_at,
        };
        self.store
            .update_with(
                principal.id,
                Box::new(move |p: &mut Principal| p.reset_code = Some(stored)),
            )
            .await?;

        let _ = mail::deliver_later(
            &self.tasks,
            self.mailer.clone(),
            principal.email,
            templates::password_reset(&code, RESET_CODE_TTL.as_secs() / 60),
        );

        tracing::info!(principal_id = principal.id, "Password reset code issued");
        Ok(())
    }

    /// Consume the reset code issued to `email`: new password, code cleared,
    /// sessions revoked.
    ///
    /// The code is only compared against that one account, so two accounts
    /// holding the same six digits never affect each other.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        validate_password(new_password)?;

        let principal = match self.store.find_by_email(email).await {
            Ok(p) => p,
            Err(StoreError::NotFound) => return Err(AccountError::InvalidResetCode),
            Err(e) => return Err(e.into()),
        };
        let now = self.clock.unix_secs();
        match &principal.reset_code {
            Some(rc) if code_matches(rc, code) => {
                if rc.expires_at <= now {
                    return Err(AccountError::ResetCodeExpired);
                }
            }
            _ => return Err(AccountError::InvalidResetCode),
        }

        let new_hash = hash_blocking(new_password.to_string()).await?;

        // The code is checked again under the record lock: a concurrent reset
        // or a newer code invalidates this one.
        let code = code.to_string();
        let consumed = Arc::new(AtomicBool::new(false));
        let flag = consumed.clone();
        let updated = self
            .store
            .update_with(
                principal.id,
                Box::new(move |p: &mut Principal| {
                    let valid = p
                        .reset_code
                        .as_ref()
                        .is_some_and(|rc| code_matches(rc, &code) && rc.expires_at > now);
                    if valid {
                        p.password_hash = new_hash;
                        p.reset_code = None;
                        p.epoch += 1;
                        flag.store(true, Ordering::SeqCst);
                    }
                }),
            )
            .await?;

        if !consumed.load(Ordering::SeqCst) {
            return Err(AccountError::InvalidResetCode);
        }

        metrics::record_revocation();
        tracing::info!(principal_id = updated.id, epoch = updated.epoch, "Password reset");
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn code_matches(stored: &ResetCode, code: &str) -> bool {
    stored.code.as_bytes().ct_eq(code.as_bytes()).into()
}

fn validate_email(email: &str) -> Result<(), AccountError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || email.contains(char::is_whitespace) {
        return Err(AccountError::Validation("a valid email is required".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AccountError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

async fn hash_blocking(password: String) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AccountError::Internal(e.to_string()))?
        .map_err(|e| AccountError::Internal(e.to_string()))
}

async fn verify_blocking(password: String, hash: String) -> Result<(), PasswordError> {
    tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
        .await
        .map_err(|e| PasswordError::Hashing(e.to_string()))?
}
