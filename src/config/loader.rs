//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `session.secret`.
pub const ENV_SESSION_SECRET: &str = "ACCOUNT_API_SESSION_SECRET";
/// Environment variable overriding `server.bind_address`.
pub const ENV_BIND_ADDRESS: &str = "ACCOUNT_API_BIND_ADDRESS";
/// Environment variable overriding `mail.smtp_password`.
pub const ENV_SMTP_PASSWORD: &str = "ACCOUNT_API_SMTP_PASSWORD";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides to, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: AppConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay values from the environment. `lookup` is injectable for tests.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(secret) = lookup(ENV_SESSION_SECRET) {
        config.session.secret = secret;
    }
    if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
        config.server.bind_address = addr;
    }
    if let Some(password) = lookup(ENV_SMTP_PASSWORD) {
        config.mail.smtp_password = password;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            bind_address = "127.0.0.1:9000"

            [workers]
            count = 2
            queue_capacity = 8

            [session]
            secret = "k3Jd9vQz1LmX7pW2rT5yB8nC4hF6gA0e"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.queue_capacity, 8);
    }

    #[test]
    fn test_load_reports_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[workers]\ncount = 0").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "workers.count"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_file_without_session_secret_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"127.0.0.1:9000\"").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "session.secret"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[workers\ncount = ").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            ENV_SESSION_SECRET => Some("s".repeat(40)),
            ENV_BIND_ADDRESS => Some("127.0.0.1:1".into()),
            ENV_SMTP_PASSWORD => Some("hunter22".into()),
            _ => None,
        });
        assert_eq!(config.session.secret.len(), 40);
        assert_eq!(config.server.bind_address, "127.0.0.1:1");
        assert_eq!(config.mail.smtp_password, "hunter22");
    }
}
