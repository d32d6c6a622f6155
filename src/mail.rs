//! Outbound mail delivery seam.
//!
//! Campaign sends and workflow email actions go through the `Mailer` trait
//! so a real provider can be slotted in. The default backend only records
//! the send in the log.

use async_trait::async_trait;

#[derive(Debug)]
pub enum MailError {
    Rejected(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Rejected(msg) => write!(f, "Mail rejected: {}", msg),
        }
    }
}

impl std::error::Error for MailError {}

pub type MailResult<T> = Result<T, MailError>;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> MailResult<()>;
}

/// Logs each send instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> MailResult<()> {
        if to.is_empty() || !to.contains('@') {
            return Err(MailError::Rejected(format!("invalid address: {:?}", to)));
        }
        tracing::info!("mail to={} subject={:?} bytes={}", to, subject, body.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_mailer_accepts_addresses() {
        let mailer = LogMailer;
        assert!(mailer.send("pat@example.com", "Welcome", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_log_mailer_rejects_garbage() {
        let mailer = LogMailer;
        assert!(mailer.send("", "Welcome", "hello").await.is_err());
        assert!(mailer.send("not-an-address", "Welcome", "hello").await.is_err());
    }
}
