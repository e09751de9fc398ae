//! Outbound mail.
//!
//! Request handlers never call a transport directly: [`deliver_later`] hands
//! the message to the task pool and returns at once.

pub mod templates;
pub mod transport;

use std::sync::Arc;

pub use templates::Message;
pub use transport::{
    LogTransport, MailError, MailTransport, MemoryTransport, SentMail, SmtpTransport,
};

use crate::config::{MailConfig, MailTransportKind};
use crate::tasks::{SubmitError, TaskPool};

/// Queue `message` for `to` on the task pool.
///
/// A rejected submission is already logged by the pool; the caller decides
/// whether it matters.
pub fn deliver_later(
    pool: &TaskPool,
    transport: Arc<dyn MailTransport>,
    to: String,
    message: Message,
) -> Result<(), SubmitError> {
    pool.submit_as("mail", async move {
        match transport
            .send(&to, &message.subject, &message.html_body)
            .await
        {
            Ok(()) => tracing::debug!(to = %to, subject = %message.subject, "Mail sent"),
            Err(e) => tracing::error!(to = %to, error = %e, "Mail delivery failed"),
        }
    })
}

/// Build the transport named in config.
pub fn transport_from_config(config: &MailConfig) -> Result<Arc<dyn MailTransport>, MailError> {
    Ok(match config.transport {
        MailTransportKind::Log => Arc::new(LogTransport::new(config.from.clone())),
        MailTransportKind::Memory => Arc::new(MemoryTransport::new()),
        MailTransportKind::Smtp => Arc::new(SmtpTransport::from_config(config)?),
    })
}
