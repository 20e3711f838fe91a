use serde_json::{json, Value};
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditStep};
use crate::dates;
use crate::model::*;
use crate::observability;

use super::error::BookingError;
use super::unwind::{Compensation, Unwind};
use super::{log_failure, BookingService};

const ACTION: AuditAction = AuditAction::CancelBooking;

impl BookingService {
    /// Delete a booking and hand its office and user slots back.
    ///
    /// Users may cancel their own bookings from today onwards; managers of
    /// the booking's office may cancel any date.
    pub async fn cancel_booking(
        &self,
        current_user: &User,
        id: &str,
        user_email: &str,
    ) -> Result<BookingView, BookingError> {
        let attempt = Ulid::new();
        let result = self.run_cancel(attempt, current_user, id, user_email).await;
        match &result {
            Ok(view) => {
                metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
                info!(%attempt, "booking {} cancelled for {}", view.id, view.user);
            }
            Err(e) => log_failure(attempt, "cancel booking", e),
        }
        result
    }

    async fn run_cancel(
        &self,
        attempt: Ulid,
        current_user: &User,
        id: &str,
        user_email: &str,
    ) -> Result<BookingView, BookingError> {
        let user_email = normalize_email(user_email);
        // Outsiders get the same answer whether or not the booking exists.
        if !current_user.is(&user_email) && !current_user.permissions.manages_any_office() {
            return Err(BookingError::Forbidden);
        }
        let booking = self
            .records
            .query(&BookingQuery::for_user(&user_email))
            .await
            .map_err(BookingError::store)?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;

        if !Self::authorized(current_user, &booking.user, &booking.office_id) {
            return Err(BookingError::Forbidden);
        }
        let manages = current_user.permissions.can_manage_office(&booking.office_id);
        if !manages && booking.date < self.clock.today() {
            return Err(BookingError::Forbidden);
        }

        self.audit_step(
            attempt,
            ACTION,
            AuditStep::DELETE_BOOKING,
            json!({ "booking": &booking, "currentUser": &current_user.email }),
        );
        let deleted = self
            .records
            .delete(&booking.id, &booking.user)
            .await
            .map_err(BookingError::store)?
            // Lost a race with another cancel; that one released the slots.
            .ok_or_else(|| BookingError::NotFound(id.to_string()))?;

        // Failures are logged and audited by the unwind; the record is already gone.
        let mut release = Unwind::default();
        release.push(Compensation::OfficeSlot {
            office_id: deleted.office_id.clone(),
            date: deleted.date,
            parking: deleted.parking,
        });
        release.push(Compensation::UserSlot {
            email: deleted.user.clone(),
            week_start: dates::week_start(deleted.date),
        });
        release
            .run("2", attempt, ACTION, self.counters.as_ref(), self.audit.as_ref())
            .await;

        self.audit_step(attempt, ACTION, AuditStep::CANCEL_COMPLETED, Value::Null);
        let office = self.config.office(&deleted.office_id);
        Ok(BookingView::new(deleted, office))
    }
}
