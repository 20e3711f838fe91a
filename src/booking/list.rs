use crate::dates;
use crate::model::*;

use super::error::BookingError;
use super::BookingService;

impl BookingService {
    /// Bookings visible to `current_user`, sorted by date then office.
    ///
    /// Without a user filter, non-managers only ever see their own bookings.
    pub async fn get_bookings(
        &self,
        current_user: &User,
        mut query: BookingQuery,
    ) -> Result<Vec<BookingView>, BookingError> {
        let manages_office = query
            .office_id
            .as_deref()
            .is_some_and(|o| current_user.permissions.can_manage_office(o));
        let manages_all = current_user.permissions.can_manage_all_bookings;

        match query.user.take() {
            Some(user) => {
                let user = normalize_email(&user);
                if !current_user.is(&user) && !manages_all && !manages_office {
                    return Err(BookingError::Forbidden);
                }
                query.user = Some(user);
            }
            None if manages_all || manages_office => {}
            None => query.user = Some(current_user.email.clone()),
        }

        let bookings = self
            .records
            .query(&query)
            .await
            .map_err(BookingError::store)?;
        Ok(bookings
            .into_iter()
            .map(|b| {
                let office = self.config.office(&b.office_id);
                BookingView::new(b, office)
            })
            .collect())
    }

    /// Remaining desk and parking capacity for each bookable date.
    pub async fn office_availability(
        &self,
        office_id: &str,
    ) -> Result<Vec<DayAvailability>, BookingError> {
        let office = self.config.office(office_id).ok_or_else(|| {
            BookingError::invalid("Office not found", format!("Office not found: {office_id}"))
        })?;
        let window = dates::available_dates(&self.config, self.clock.today());
        let counts = self
            .counters
            .get_counts(&office.id, &window)
            .await
            .map_err(BookingError::store)?;

        Ok(window
            .into_iter()
            .map(|date| {
                let used = counts.get(&date).copied().unwrap_or_default();
                DayAvailability {
                    date: dates::format_date(date),
                    available: office.quota.saturating_sub(used.booking_count),
                    parking_available: office.parking_quota.saturating_sub(used.parking_count),
                }
            })
            .collect())
    }
}
