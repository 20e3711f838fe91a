use chrono::NaiveDate;

use crate::model::*;

use super::{Engine, OfficeDay, UserWeek};

impl Engine {
    /// Copy of one office row, if it has been created.
    pub async fn office_counter(&self, office_id: &str, date: NaiveDate) -> Option<OfficeQuotaCounter> {
        let row = self
            .office_counters
            .get(&OfficeDay::new(office_id, date))
            .map(|r| r.value().clone())?;
        let snapshot = row.lock().await.clone();
        Some(snapshot)
    }

    pub async fn user_counter(&self, email: &str, week_start: NaiveDate) -> Option<UserQuotaCounter> {
        let row = self
            .user_counters
            .get(&UserWeek::new(email, week_start))
            .map(|r| r.value().clone())?;
        let snapshot = row.lock().await.clone();
        Some(snapshot)
    }

    pub fn office_row_count(&self) -> usize {
        self.office_counters.len()
    }

    pub fn user_row_count(&self) -> usize {
        self.user_counters.len()
    }

    pub async fn booking_count(&self) -> usize {
        self.bookings.read().await.len()
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
