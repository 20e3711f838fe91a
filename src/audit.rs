use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    CreateBooking,
    CancelBooking,
}

/// `<stage>:<name>`, e.g. `2.1:DecrementingOfficeBookingCount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditStep {
    pub stage: &'static str,
    pub name: &'static str,
}

impl AuditStep {
    pub const fn new(stage: &'static str, name: &'static str) -> Self {
        Self { stage, name }
    }

    pub const INCREMENT_OFFICE: AuditStep = AuditStep::new("1", "IncrementingOfficeBookingCount");
    pub const INCREMENT_USER: AuditStep = AuditStep::new("2", "IncrementingUserBookingCount");
    pub const CREATE_BOOKING: AuditStep = AuditStep::new("3", "CreatingBooking");
    pub const COMPLETED: AuditStep = AuditStep::new("4", "Completed");

    pub const DELETE_BOOKING: AuditStep = AuditStep::new("1", "DeletingBooking");
    pub const CANCEL_COMPLETED: AuditStep = AuditStep::new("3", "Completed");
}

impl fmt::Display for AuditStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage, self.name)
    }
}

impl Serialize for AuditStep {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// One state transition of a booking transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    /// Shared by every event of one transaction.
    pub attempt: Ulid,
    pub action: AuditAction,
    pub step: AuditStep,
    pub details: Value,
}

/// Receives audit events. Injected into the booking service.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a JSON line on the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => tracing::info!(target: "audit", "{line}"),
            Err(e) => tracing::warn!(target: "audit", "unserializable audit event {}: {e}", event.step),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Rendered step labels in order, e.g. `["1:IncrementingOfficeBookingCount", ...]`.
    pub fn steps(&self) -> Vec<String> {
        self.events().iter().map(|e| e.step.to_string()).collect()
    }

    pub fn steps_for(&self, attempt: Ulid) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.attempt == attempt)
            .map(|e| e.step.to_string())
            .collect()
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_renders_stage_and_name() {
        assert_eq!(
            AuditStep::INCREMENT_OFFICE.to_string(),
            "1:IncrementingOfficeBookingCount"
        );
        assert_eq!(
            AuditStep::new("3.1", "DecrementingUserBookingCount").to_string(),
            "3.1:DecrementingUserBookingCount"
        );
    }

    #[test]
    fn event_serializes_step_as_label() {
        let event = AuditEvent {
            attempt: Ulid::nil(),
            action: AuditAction::CreateBooking,
            step: AuditStep::COMPLETED,
            details: serde_json::json!({ "office": "leeds" }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["step"], "4:Completed");
        assert_eq!(json["action"], "CreateBooking");
        assert_eq!(json["details"]["office"], "leeds");
    }

    #[test]
    fn log_filters_by_attempt() {
        let log = AuditLog::new();
        let a = Ulid::new();
        let b = Ulid::new();
        for (attempt, step) in [(a, AuditStep::INCREMENT_OFFICE), (b, AuditStep::INCREMENT_OFFICE), (a, AuditStep::COMPLETED)] {
            log.record(AuditEvent {
                attempt,
                action: AuditAction::CreateBooking,
                step,
                details: Value::Null,
            });
        }
        assert_eq!(log.steps().len(), 3);
        assert_eq!(
            log.steps_for(a),
            vec!["1:IncrementingOfficeBookingCount", "4:Completed"]
        );
    }
}
