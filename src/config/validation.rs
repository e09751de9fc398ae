//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every error is collected, not just the first.

use std::net::SocketAddr;

use crate::config::schema::{AppConfig, MailTransportKind};

/// Minimum length of the HMAC secret in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Secrets containing one of these are sample values copied from docs.
const PLACEHOLDER_MARKERS: &[&str] = &["change_me", "changeme", "change-me", "placeholder", "example"];

/// Fewer distinct bytes than this and the secret is guessable.
const MIN_DISTINCT_SECRET_BYTES: usize = 8;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("not a socket address: {}", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    if config.workers.count == 0 {
        errors.push(ValidationError::new("workers.count", "must be > 0"));
    }
    if config.workers.queue_capacity == 0 {
        errors.push(ValidationError::new("workers.queue_capacity", "must be > 0"));
    }

    let rl = &config.rate_limit;
    if rl.enabled {
        if !(rl.requests_per_second.is_finite() && rl.requests_per_second > 0.0) {
            errors.push(ValidationError::new(
                "rate_limit.requests_per_second",
                "must be a positive number",
            ));
        }
        if rl.burst_size == 0 {
            errors.push(ValidationError::new("rate_limit.burst_size", "must be > 0"));
        }
        if rl.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be > 0"));
        }
    }

    let session = &config.session;
    if let Some(problem) = secret_problem(&session.secret) {
        errors.push(ValidationError::new("session.secret", problem));
    }
    if session.access_ttl_secs == 0 {
        errors.push(ValidationError::new("session.access_ttl_secs", "must be > 0"));
    }
    if session.refresh_ttl_secs <= session.access_ttl_secs {
        errors.push(ValidationError::new(
            "session.refresh_ttl_secs",
            "must be longer than session.access_ttl_secs",
        ));
    }

    let mail = &config.mail;
    if mail.transport == MailTransportKind::Smtp {
        if mail.smtp_host.trim().is_empty() {
            errors.push(ValidationError::new("mail.smtp_host", "required for the smtp transport"));
        }
        if mail.smtp_port == 0 {
            errors.push(ValidationError::new("mail.smtp_port", "must be > 0"));
        }
        if !mail.from.contains('@') {
            errors.push(ValidationError::new(
                "mail.from",
                format!("not a mail address: {}", mail.from),
            ));
        }
        if mail.smtp_username.is_empty() != mail.smtp_password.is_empty() {
            errors.push(ValidationError::new(
                "mail.smtp_password",
                "smtp_username and smtp_password must be set together",
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn secret_problem(secret: &str) -> Option<String> {
    if secret.is_empty() {
        return Some("must be set".to_string());
    }
    let lower = secret.to_ascii_lowercase();
    if PLACEHOLDER_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some("looks like a placeholder; generate a random secret".to_string());
    }
    if secret.len() < MIN_SECRET_LEN {
        return Some(format!("must be at least {MIN_SECRET_LEN} bytes"));
    }
    let mut seen = [false; 256];
    let distinct = secret
        .bytes()
        .filter(|b| !std::mem::replace(&mut seen[usize::from(*b)], true))
        .count();
    if distinct < MIN_DISTINCT_SECRET_BYTES {
        return Some("too predictable; generate a random secret".to_string());
    }
    None
}
