//! vax-notify
//!
//! Outbound notification seams. Both channels are best-effort: handlers log
//! failures and never fail a request over them. The channel is an explicit
//! dependency constructed once at process start and injected into the daemon
//! state — there is no global connection registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vax_schemas::VaccinationRecord;

/// What a notification is about; channels may route on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    OrderApproved,
    OrderRejected,
    PaymentReceived,
    AppointmentScheduled,
    Vaccinated,
    OrderCancelled,
    PaymentRefunded,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderApproved => "order_approved",
            Self::OrderRejected => "order_rejected",
            Self::PaymentReceived => "payment_received",
            Self::AppointmentScheduled => "appointment_scheduled",
            Self::Vaccinated => "vaccinated",
            Self::OrderCancelled => "order_cancelled",
            Self::PaymentRefunded => "payment_refunded",
        }
    }
}

/// Fire-and-forget user notification channel.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Deliver `message` to `user_id`. Errors are the caller's to log, not
    /// to propagate.
    async fn notify(&self, user_id: Uuid, message: &str, kind: NoticeKind) -> anyhow::Result<()>;
}

/// Vaccination certificate delivery. Failure after a committed transition is
/// reported as a soft-failure flag on the response, never a rollback.
#[async_trait]
pub trait CertificateMailer: Send + Sync {
    async fn send_certificate(
        &self,
        email: Option<&str>,
        record: &VaccinationRecord,
    ) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Production implementations
// ---------------------------------------------------------------------------

/// Logs every notification at info level. Stands in for the SMS/email
/// gateway; swapping in a real transport only touches process wiring.
pub struct TracingNotifier;

#[async_trait]
impl NotifyChannel for TracingNotifier {
    async fn notify(&self, user_id: Uuid, message: &str, kind: NoticeKind) -> anyhow::Result<()> {
        tracing::info!(%user_id, kind = kind.as_str(), message, "notify");
        Ok(())
    }
}

/// Drops every notification. Wired when notifications are disabled.
pub struct NoopNotifier;

#[async_trait]
impl NotifyChannel for NoopNotifier {
    async fn notify(&self, _: Uuid, _: &str, _: NoticeKind) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs certificate sends; fails when the patient has no email on file so
/// the soft-failure path is exercised in production too.
pub struct TracingMailer;

#[async_trait]
impl CertificateMailer for TracingMailer {
    async fn send_certificate(
        &self,
        email: Option<&str>,
        record: &VaccinationRecord,
    ) -> anyhow::Result<()> {
        let Some(email) = email else {
            anyhow::bail!("patient has no email on file");
        };
        tracing::info!(
            email,
            record_id = %record.record_id,
            order_id = %record.order_id,
            "certificate email sent"
        );
        Ok(())
    }
}
