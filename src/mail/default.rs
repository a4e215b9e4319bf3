//! Default email sender
//!
//! Writes each message to the structured log instead of a mail relay. The
//! message body is not logged since it carries the invitation token.

use async_trait::async_trait;
use metrics::counter;
use tracing::info;

use crate::mail::{EmailSender, MailError, OutgoingMail};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmailSender;

#[async_trait]
impl EmailSender for TracingEmailSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if mail.to.is_empty() {
            return Err(MailError::Delivery("recipient is empty".to_string()));
        }

        info!(
            from = %mail.from,
            to = %mail.to,
            subject = %mail.subject,
            body_len = mail.body.len(),
            "Email dispatched"
        );
        counter!("emails_sent_total").increment(1);
        Ok(())
    }
}
