//! Outgoing mail
//!
//! Provides the email sender abstraction used for invitation mail. Delivery is
//! a single attempt; a failed send is logged and reported to the caller but
//! never undoes the operation that triggered it.

pub mod default;

use std::sync::Arc;

use async_trait::async_trait;

pub use default::TracingEmailSender;

/// One outgoing email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Trait for email delivery implementations
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends one message; no retries
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

pub type SharedMailer = Arc<dyn EmailSender>;

/// Composes the invitation email for `invitee`.
pub fn invitation_mail(
    from: &str,
    invitee: &str,
    organization: &str,
    role: &str,
    token: &str,
) -> OutgoingMail {
    OutgoingMail {
        from: from.to_string(),
        to: invitee.to_string(),
        subject: format!("You have been invited to join {organization}"),
        body: format!(
            "You have been invited to join {organization} as {role}.\n\n\
             Use this invitation code to accept within 7 days:\n\n    {token}\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_mail_carries_token_and_role() {
        let mail = invitation_mail("no-reply@outpost.local", "ada@example.com", "Acme", "admin", "tok123");

        assert_eq!(mail.to, "ada@example.com");
        assert!(mail.subject.contains("Acme"));
        assert!(mail.body.contains("tok123"));
        assert!(mail.body.contains("admin"));
    }
}
