//! Booking transactions: create (quota-checked, compensating), cancel, list.

mod cancel;
mod create;
mod error;
mod list;
mod unwind;

pub use create::CreateMode;
pub use error::{BookingError, Rollback};

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn, Level};
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent, AuditSink, AuditStep};
use crate::config::Config;
use crate::dates::Clock;
use crate::engine::Engine;
use crate::model::User;
use crate::notify::{MailTransport, NotificationDispatcher};
use crate::store::{BookingStore, QuotaCounterStore, UserDirectory};

/// Everything a booking transaction talks to. Holds no booking state itself:
/// every count is read and written through the counter store.
#[derive(Clone)]
pub struct BookingService {
    config: Arc<Config>,
    counters: Arc<dyn QuotaCounterStore>,
    records: Arc<dyn BookingStore>,
    users: Arc<dyn UserDirectory>,
    notifier: NotificationDispatcher,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
}

impl BookingService {
    pub fn new(
        config: Arc<Config>,
        counters: Arc<dyn QuotaCounterStore>,
        records: Arc<dyn BookingStore>,
        users: Arc<dyn UserDirectory>,
        mail: Arc<dyn MailTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            counters,
            records,
            users,
            notifier: NotificationDispatcher::new(mail),
            audit,
            clock: Clock::System,
        }
    }

    /// Counters and records both served by one engine.
    pub fn with_engine(
        config: Arc<Config>,
        engine: Arc<Engine>,
        users: Arc<dyn UserDirectory>,
        mail: Arc<dyn MailTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::new(config, engine.clone(), engine, users, mail, audit)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subject user, global manager, or manager of this office.
    fn authorized(current_user: &User, subject: &str, office_id: &str) -> bool {
        current_user.is(subject) || current_user.permissions.can_manage_office(office_id)
    }

    fn audit_step(&self, attempt: Ulid, action: AuditAction, step: AuditStep, details: Value) {
        self.audit.record(AuditEvent {
            attempt,
            action,
            step,
            details,
        });
    }
}

fn log_failure(attempt: Ulid, what: &str, err: &BookingError) {
    let status = err.status();
    let rollback = err.rollback();
    if err.level() == Level::ERROR {
        error!(%attempt, status, ?rollback, "{what} failed: {err}");
    } else {
        warn!(%attempt, status, "{what} rejected: {err}");
    }
}
