use chrono::NaiveDate;
use serde_json::json;
use tracing::error;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent, AuditSink, AuditStep};
use crate::observability;
use crate::store::QuotaCounterStore;

use super::error::Rollback;

/// A successful reservation that must be released if a later step fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Compensation {
    OfficeSlot {
        office_id: String,
        date: NaiveDate,
        parking: bool,
    },
    UserSlot {
        email: String,
        week_start: NaiveDate,
    },
}

impl Compensation {
    fn step(&self, stage: &'static str) -> AuditStep {
        match self {
            Compensation::OfficeSlot { .. } => AuditStep::new(stage, "DecrementingOfficeBookingCount"),
            Compensation::UserSlot { .. } => AuditStep::new(stage, "DecrementingUserBookingCount"),
        }
    }

    async fn release(&self, counters: &dyn QuotaCounterStore) -> Result<(), String> {
        let result = match self {
            Compensation::OfficeSlot { office_id, date, parking } => {
                counters.release_office_slot(office_id, *date, *parking).await
            }
            Compensation::UserSlot { email, week_start } => {
                counters.release_user_slot(email, *week_start).await
            }
        };
        result.map_err(|e| format!("{self:?}: {e}"))
    }
}

/// Reservations taken so far in one transaction, released last-in first-out.
#[derive(Debug, Default)]
pub(crate) struct Unwind {
    stack: Vec<Compensation>,
}

impl Unwind {
    pub(crate) fn push(&mut self, compensation: Compensation) {
        self.stack.push(compensation);
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &[Compensation] {
        &self.stack
    }

    /// Release everything. A failed release does not stop the rest; every
    /// failure is collected into `Rollback::Failed`.
    pub(crate) async fn run(
        mut self,
        stage: &'static str,
        attempt: Ulid,
        action: AuditAction,
        counters: &dyn QuotaCounterStore,
        audit: &dyn AuditSink,
    ) -> Rollback {
        if self.stack.is_empty() {
            return Rollback::NotNeeded;
        }
        let mut failures = Vec::new();
        while let Some(compensation) = self.stack.pop() {
            audit.record(AuditEvent {
                attempt,
                action,
                step: compensation.step(stage),
                details: json!({ "compensation": format!("{compensation:?}") }),
            });
            metrics::counter!(observability::COMPENSATIONS_TOTAL).increment(1);
            if let Err(e) = compensation.release(counters).await {
                failures.push(e);
            }
        }
        if failures.is_empty() {
            return Rollback::Completed;
        }

        let reason = failures.join("; ");
        error!(%attempt, "compensation failed, counters need reconciling: {reason}");
        metrics::counter!(observability::COMPENSATION_FAILURES_TOTAL).increment(1);
        audit.record(AuditEvent {
            attempt,
            action,
            step: AuditStep::new(stage, "CompensationFailed"),
            details: json!({ "error": reason }),
        });
        Rollback::Failed(reason)
    }
}
