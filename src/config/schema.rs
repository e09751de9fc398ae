//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the API.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the account API.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Background task pool sizing.
    pub workers: WorkerConfig,

    /// Per-client rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Credential issuing and verification.
    pub session: SessionConfig,

    /// Outbound mail.
    pub mail: MailConfig,

    /// User record store.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Public URL of the frontend, linked from outgoing mail.
    pub public_url: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Background task pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of persistent workers.
    pub count: usize,

    /// Maximum number of queued jobs before new ones are dropped.
    pub queue_capacity: usize,

    /// How long shutdown waits for in-flight jobs, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_capacity: 100,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Tokens refilled per second per client.
    pub requests_per_second: f64,

    /// Burst capacity.
    pub burst_size: u32,

    /// Interval between idle-client sweeps, in seconds.
    pub sweep_interval_secs: u64,

    /// Clients idle longer than this are forgotten, in seconds.
    pub idle_ttl_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 5.0,
            burst_size: 10,
            sweep_interval_secs: 180,
            idle_ttl_secs: 180,
        }
    }
}

/// Credential configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shared HMAC secret. Must be at least 32 bytes. Empty by default, so
    /// the service refuses to start until one is configured.
    pub secret: String,

    /// Access credential lifetime in seconds.
    pub access_ttl_secs: u64,

    /// Refresh credential lifetime in seconds.
    pub refresh_ttl_secs: u64,

    /// Reject refresh credentials whose epoch is no longer current.
    pub bind_refresh_to_epoch: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            bind_refresh_to_epoch: true,
        }
    }
}

/// Which mail transport to construct.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MailTransportKind {
    /// Write messages to the log.
    Log,
    /// Keep messages in memory (tests, local development).
    Memory,
    /// Deliver through an SMTP relay.
    Smtp,
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain connection. Only for local relays.
    None,
    /// Upgrade with STARTTLS (usually port 587).
    StartTls,
    /// TLS from the first byte (usually port 465).
    Tls,
}

/// Outbound mail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// Sender address.
    pub from: String,

    /// Transport implementation.
    pub transport: MailTransportKind,

    /// SMTP relay host.
    pub smtp_host: String,

    /// SMTP relay port.
    pub smtp_port: u16,

    /// SMTP login. Empty means no authentication.
    pub smtp_username: String,

    pub smtp_password: String,

    pub smtp_security: SmtpSecurity,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "no-reply@localhost".to_string(),
            transport: MailTransportKind::Log,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_security: SmtpSecurity::StartTls,
        }
    }
}

/// User store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot loaded at startup and written at shutdown.
    pub snapshot_path: Option<String>,

    /// Directory holding avatar files. A replaced or purged avatar is only
    /// deleted from disk when its path lies under this directory; `None`
    /// never deletes anything.
    pub uploads_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            uploads_dir: Some("uploads".to_string()),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
