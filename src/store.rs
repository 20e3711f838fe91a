//! Repository seams between the booking orchestrator and storage.
//!
//! `Engine` implements both store traits; tests wrap it to inject failures.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::engine::EngineError;
use crate::model::*;

/// Shared quota counters. The only serialization point between concurrent bookings.
#[async_trait]
pub trait QuotaCounterStore: Send + Sync {
    /// Create the row if absent, then increment iff
    /// `booking_count < quota && (!wants_parking || parking_count < parking_quota)`.
    async fn reserve_office_slot(
        &self,
        office: &OfficeQuota,
        date: NaiveDate,
        wants_parking: bool,
    ) -> Result<Reservation, EngineError>;

    /// Unconditional decrement. Only valid after a matching successful reserve.
    async fn release_office_slot(
        &self,
        office_id: &str,
        date: NaiveDate,
        had_parking: bool,
    ) -> Result<(), EngineError>;

    async fn reserve_user_slot(
        &self,
        email: &str,
        week_start: NaiveDate,
        quota: u32,
    ) -> Result<Reservation, EngineError>;

    async fn release_user_slot(&self, email: &str, week_start: NaiveDate)
    -> Result<(), EngineError>;

    /// Bulk read; dates with no row yet report zero counts.
    async fn get_counts(
        &self,
        office_id: &str,
        dates: &[NaiveDate],
    ) -> Result<BTreeMap<NaiveDate, OfficeCounts>, EngineError>;
}

/// Booking records, unique per (user, date).
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert guarded by "must not already exist". A clash is reported, not raised.
    async fn create(&self, booking: Booking) -> Result<Created, EngineError>;

    /// Remove the user's booking with this id, returning it if it existed.
    async fn delete(&self, id: &str, user: &str) -> Result<Option<Booking>, EngineError>;

    /// Range read, sorted by date then office.
    async fn query(&self, query: &BookingQuery) -> Result<Vec<Booking>, EngineError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Unknown users resolve to a default profile rather than an error.
    async fn get_user(&self, email: &str) -> Result<User, EngineError>;
}
