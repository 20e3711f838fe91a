use std::time::Instant;

use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditStep};
use crate::dates;
use crate::engine::EngineError;
use crate::limits::*;
use crate::model::*;
use crate::notify::ReasonNotice;
use crate::observability;

use super::error::{BookingError, Rollback};
use super::unwind::{Compensation, Unwind};
use super::{log_failure, BookingService};

const ACTION: AuditAction = AuditAction::CreateBooking;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreateMode {
    #[default]
    Interactive,
    /// Replaying a backup: the bookable window and the notification are skipped.
    Restore,
}

impl BookingService {
    pub async fn create_booking(
        &self,
        current_user: &User,
        request: CreateBooking,
    ) -> Result<BookingView, BookingError> {
        self.create_booking_with(current_user, request, CreateMode::Interactive)
            .await
    }

    pub async fn create_booking_with(
        &self,
        current_user: &User,
        request: CreateBooking,
        mode: CreateMode,
    ) -> Result<BookingView, BookingError> {
        let attempt = Ulid::new();
        let started = Instant::now();
        let result = self.run_create(attempt, current_user, request, mode).await;
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(view) => {
                metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!(%attempt, "booking {} created for {} on {}", view.id, view.user, view.date);
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.kind())
                    .increment(1);
                log_failure(attempt, "create booking", e);
            }
        }
        result
    }

    async fn run_create(
        &self,
        attempt: Ulid,
        current_user: &User,
        request: CreateBooking,
        mode: CreateMode,
    ) -> Result<BookingView, BookingError> {
        if !Self::authorized(current_user, &request.user, &request.office.id) {
            return Err(BookingError::Forbidden);
        }

        let date = dates::parse_date(&request.date).ok_or_else(|| {
            BookingError::invalid(
                "Invalid date format",
                format!("Invalid date format: {}", request.date),
            )
        })?;
        if mode == CreateMode::Interactive
            && !dates::is_bookable(&self.config, self.clock.today(), date)
        {
            return Err(BookingError::invalid(
                "Date out of range",
                format!("Date out of range: {}", request.date),
            ));
        }

        let user_email = normalize_email(&request.user);
        if user_email.is_empty() || user_email.len() > MAX_EMAIL_LEN {
            return Err(BookingError::invalid("Invalid user", format!("Invalid user: {}", request.user)));
        }
        if request
            .reason_to_book
            .as_ref()
            .is_some_and(|r| r.len() > MAX_REASON_LEN)
        {
            return Err(BookingError::invalid(
                "Reason to book too long",
                format!("Reason to book over {MAX_REASON_LEN} bytes"),
            ));
        }

        let office = self.config.office(&request.office.id).ok_or_else(|| {
            BookingError::invalid(
                "Office not found",
                format!("Office not found: {}", request.office.id),
            )
        })?;

        // Resolved up front so a missing reason can never cost a reserve-then-release.
        let notice = match mode {
            CreateMode::Interactive => self.prepare_notice(&request, &user_email, office, date).await?,
            CreateMode::Restore => None,
        };

        let parking = request.parking.unwrap_or(false);
        // Only backups may carry their own id and timestamp.
        let (id, created) = match mode {
            CreateMode::Restore => (request.id.clone(), request.created),
            CreateMode::Interactive => (None, None),
        };
        let booking = Booking {
            id: id.unwrap_or_else(|| Booking::derive_id(&office.id, date)),
            created: created.unwrap_or_else(|| self.clock.now_ms()),
            user: user_email.clone(),
            office_id: office.id.clone(),
            date,
            parking,
            reason_to_book: request.reason_to_book.clone(),
        };
        let week_start = dates::week_start(date);

        // Optimistic pre-check; the conditional increment below is what actually guards.
        let counts = self
            .counters
            .get_counts(&office.id, &[date])
            .await
            .map_err(BookingError::store)?
            .remove(&date)
            .unwrap_or_default();
        let office_full = counts.booking_count >= office.quota;
        let parking_full = parking && counts.parking_count >= office.parking_quota;
        if office_full || parking_full {
            let which = match (office_full, parking_full) {
                (true, true) => "Office and parking quota",
                (true, false) => "Office quota",
                _ => "Office parking quota",
            };
            return Err(BookingError::QuotaExceeded {
                message: format!("{which} exceeded"),
                internal: format!(
                    "{which} has exceeded for {} on date: {}",
                    office.name, request.date
                ),
                rollback: Rollback::NotNeeded,
            });
        }

        let mut unwind = Unwind::default();

        self.audit_step(
            attempt,
            ACTION,
            AuditStep::INCREMENT_OFFICE,
            json!({
                "booking": &booking,
                "startOfWeek": dates::format_date(week_start),
                "currentUser": &current_user.email,
            }),
        );
        match self
            .counters
            .reserve_office_slot(office, date, parking)
            .await
            .map_err(BookingError::store)?
        {
            Reservation::Reserved => unwind.push(Compensation::OfficeSlot {
                office_id: office.id.clone(),
                date,
                parking,
            }),
            Reservation::Full => {
                let (extra, internal_extra) = if parking {
                    (
                        " or parking quota",
                        format!(" or parking quota of {}", office.parking_quota),
                    )
                } else {
                    ("", String::new())
                };
                return Err(BookingError::QuotaExceeded {
                    message: format!("Office quota{extra} exceeded"),
                    internal: format!(
                        "Office quota of {}{internal_extra} has exceeded for {} on date: {}",
                        office.quota, office.name, request.date
                    ),
                    rollback: Rollback::NotNeeded,
                });
            }
        }

        self.audit_step(attempt, ACTION, AuditStep::INCREMENT_USER, Value::Null);
        let subject = match self.users.get_user(&user_email).await {
            Ok(user) => user,
            Err(e) => return Err(self.abort(attempt, unwind, "2.1", e).await),
        };
        let reserved = match self
            .counters
            .reserve_user_slot(&user_email, week_start, subject.quota)
            .await
        {
            Ok(r) => r,
            Err(e) => return Err(self.abort(attempt, unwind, "2.1", e).await),
        };
        if reserved == Reservation::Full {
            let rollback = self.release_all(attempt, unwind, "2.1").await;
            return Err(BookingError::QuotaExceeded {
                message: "User quota exceeded".into(),
                internal: format!(
                    "User quota of {} has exceeded for {user_email} on date: {}",
                    subject.quota, request.date
                ),
                rollback,
            });
        }
        unwind.push(Compensation::UserSlot {
            email: user_email.clone(),
            week_start,
        });

        self.audit_step(attempt, ACTION, AuditStep::CREATE_BOOKING, Value::Null);
        let created = match self.records.create(booking).await {
            Ok(created) => created,
            Err(e) => return Err(self.abort(attempt, unwind, "3.1", e).await),
        };
        let booking = match created {
            Created::Booking(booking) => booking,
            Created::Duplicate => {
                let rollback = self.release_all(attempt, unwind, "3.1").await;
                return Err(BookingError::Conflict {
                    message: "Can't have multiple bookings per day",
                    internal: format!(
                        "Duplicate booking found for {user_email} on date: {}",
                        request.date
                    ),
                    rollback,
                });
            }
        };

        self.audit_step(
            attempt,
            ACTION,
            AuditStep::COMPLETED,
            json!({ "id": &booking.id }),
        );
        // Not compensated: the booking is already durable.
        if let Some(notice) = notice {
            self.notifier
                .dispatch(&notice)
                .await
                .map_err(|source| BookingError::Notification {
                    booking_id: booking.id.clone(),
                    source,
                })?;
        }

        Ok(BookingView::new(booking, Some(office)))
    }

    /// `None` when no notice is due: notifications unconfigured, the user is
    /// auto-approved, or this deployment never sends mail.
    async fn prepare_notice(
        &self,
        request: &CreateBooking,
        user_email: &str,
        office: &OfficeQuota,
        date: NaiveDate,
    ) -> Result<Option<ReasonNotice>, BookingError> {
        let Some(to) = &self.config.notification_to_address else {
            return Ok(None);
        };
        let subject = self
            .users
            .get_user(user_email)
            .await
            .map_err(BookingError::store)?;
        if subject.auto_approved {
            return Ok(None);
        }
        let Some(from) = &self.config.from_address else {
            return Err(BookingError::Misconfigured(
                "reason notifications need a from address".into(),
            ));
        };
        let reason = request
            .reason_to_book
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if self.config.reason_to_book_required && reason.is_none() {
            return Err(BookingError::invalid(
                "Invalid reason to book given",
                "No reason to book provided",
            ));
        }
        if !self.config.sends_email() {
            return Ok(None);
        }
        Ok(Some(ReasonNotice {
            to: to.clone(),
            from: from.clone(),
            date,
            user: user_email.to_string(),
            office: office.name.clone(),
            reason: reason.unwrap_or("No reason provided").to_string(),
        }))
    }

    async fn release_all(&self, attempt: Ulid, unwind: Unwind, stage: &'static str) -> Rollback {
        unwind
            .run(stage, attempt, ACTION, self.counters.as_ref(), self.audit.as_ref())
            .await
    }

    /// Infrastructure failure mid-transaction: release what was taken, then
    /// surface the store error itself.
    async fn abort(
        &self,
        attempt: Ulid,
        unwind: Unwind,
        stage: &'static str,
        source: EngineError,
    ) -> BookingError {
        let rollback = self.release_all(attempt, unwind, stage).await;
        BookingError::Store { source, rollback }
    }
}
