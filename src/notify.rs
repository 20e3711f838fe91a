use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::dates;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail transport rejected message to {to}: {reason}")]
    Rejected { to: String, reason: String },
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
}

/// Outbound mail. Implementations talk to whatever relay the deployment uses.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        tracing::info!(to = %email.to, from = %email.from, "email: {}", email.subject);
        Ok(())
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct Outbox {
    sent: Mutex<Vec<Email>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|_| MailError::Unavailable("outbox poisoned".into()))?
            .push(email);
        Ok(())
    }
}

/// A reason-for-booking notice, fully resolved before any quota is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonNotice {
    pub to: String,
    pub from: String,
    pub date: NaiveDate,
    pub user: String,
    pub office: String,
    pub reason: String,
}

impl ReasonNotice {
    pub fn to_email(&self) -> Email {
        let date = dates::display_date(self.date);
        Email {
            to: self.to.clone(),
            from: self.from.clone(),
            subject: format!("Office Booker - {date} | {} | {}", self.user, self.office),
            body: format!(
                "Date: {date}\nUser: {}\nOffice: {}\n\nReason for booking:\n{}",
                self.user, self.office, self.reason
            ),
        }
    }
}

/// Formats notices and hands them to the transport. At most one send per booking.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn MailTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    pub async fn dispatch(&self, notice: &ReasonNotice) -> Result<(), MailError> {
        let result = self.transport.send(notice.to_email()).await;
        let label = if result.is_ok() { "sent" } else { "failed" };
        metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "status" => label).increment(1);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait]
    impl MailTransport for Refusing {
        async fn send(&self, email: Email) -> Result<(), MailError> {
            Err(MailError::Rejected {
                to: email.to,
                reason: "mailbox unavailable".into(),
            })
        }
    }

    fn notice() -> ReasonNotice {
        ReasonNotice {
            to: "approvals@x.com".into(),
            from: "noreply@x.com".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            user: "a@x.com".into(),
            office: "Leeds".into(),
            reason: "Team day".into(),
        }
    }

    #[test]
    fn fixed_template() {
        let email = notice().to_email();
        assert_eq!(email.to, "approvals@x.com");
        assert_eq!(email.from, "noreply@x.com");
        assert_eq!(email.subject, "Office Booker - 01/05/2024 | a@x.com | Leeds");
        assert_eq!(
            email.body,
            "Date: 01/05/2024\nUser: a@x.com\nOffice: Leeds\n\nReason for booking:\nTeam day"
        );
    }

    #[tokio::test]
    async fn dispatch_hands_off_once() {
        let outbox = Arc::new(Outbox::new());
        let dispatcher = NotificationDispatcher::new(outbox.clone());
        tokio_test::assert_ok!(dispatcher.dispatch(&notice()).await);
        assert_eq!(outbox.sent(), vec![notice().to_email()]);
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        let dispatcher = NotificationDispatcher::new(Arc::new(Refusing));
        let err = dispatcher.dispatch(&notice()).await.unwrap_err();
        assert!(matches!(err, MailError::Rejected { .. }));
    }
}
