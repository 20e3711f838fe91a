use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dates;
use crate::limits::*;
use crate::model::*;
use crate::store::QuotaCounterStore;

use super::{Engine, EngineError, OfficeDay, SharedOfficeCounter, SharedUserCounter, UserWeek};

fn check_office_id(office_id: &str) -> Result<(), EngineError> {
    if office_id.is_empty() || office_id.len() > MAX_OFFICE_ID_LEN {
        return Err(EngineError::LimitExceeded("office id length"));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), EngineError> {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email length"));
    }
    Ok(())
}

impl Engine {
    /// Creation guard for an office row. Returns the existing row untouched when
    /// one is already there, so a racing first-time creator can never reset counts.
    async fn office_row(&self, office_id: &str, date: NaiveDate) -> Result<SharedOfficeCounter, EngineError> {
        let key = OfficeDay::new(office_id, date);
        if let Some(row) = self.office_counters.get(&key) {
            return Ok(row.value().clone());
        }

        let expires_on = dates::retain_until(date, self.retention_days);
        let fresh: SharedOfficeCounter =
            Arc::new(Mutex::new(OfficeQuotaCounter::new(office_id, date, expires_on)));
        // Locked before it is visible: the creation record must precede any increment.
        let creating = fresh.clone().lock_owned().await;
        match self.office_counters.entry(key) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
            }
        }

        debug!("office counter created: {office_id} {date}");
        let persisted = self
            .persist(Event::OfficeCounterCreated {
                office_id: office_id.to_string(),
                date,
                expires_on,
            })
            .await;
        drop(creating);
        persisted.map(|()| fresh)
    }

    async fn user_row(&self, email: &str, week_start: NaiveDate) -> Result<SharedUserCounter, EngineError> {
        let key = UserWeek::new(email, week_start);
        if let Some(row) = self.user_counters.get(&key) {
            return Ok(row.value().clone());
        }

        let expires_on = dates::retain_week_until(week_start, self.retention_days);
        let fresh: SharedUserCounter =
            Arc::new(Mutex::new(UserQuotaCounter::new(email, week_start, expires_on)));
        let creating = fresh.clone().lock_owned().await;
        match self.user_counters.entry(key) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
            }
        }

        debug!("user counter created: {email} week of {week_start}");
        let persisted = self
            .persist(Event::UserCounterCreated {
                email: email.to_string(),
                week_start,
                expires_on,
            })
            .await;
        drop(creating);
        persisted.map(|()| fresh)
    }
}

#[async_trait]
impl QuotaCounterStore for Engine {
    async fn reserve_office_slot(
        &self,
        office: &OfficeQuota,
        date: NaiveDate,
        wants_parking: bool,
    ) -> Result<Reservation, EngineError> {
        check_office_id(&office.id)?;
        let _gate = self.gate.read().await;
        let row = self.office_row(&office.id, date).await?;

        let mut counter = row.lock().await;
        if !counter.has_room(office, wants_parking) {
            return Ok(Reservation::Full);
        }
        self.persist(Event::OfficeSlotReserved {
            office_id: office.id.clone(),
            date,
            parking: wants_parking,
        })
        .await?;
        counter.booking_count += 1;
        if wants_parking {
            counter.parking_count += 1;
        }
        Ok(Reservation::Reserved)
    }

    async fn release_office_slot(
        &self,
        office_id: &str,
        date: NaiveDate,
        had_parking: bool,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let row = self
            .office_counters
            .get(&OfficeDay::new(office_id, date))
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("office counter {office_id} {date}")))?;

        let mut counter = row.lock().await;
        if counter.booking_count == 0 || (had_parking && counter.parking_count == 0) {
            warn!(
                "releasing office slot below zero: {office_id} {date} bookings={} parking={}",
                counter.booking_count, counter.parking_count
            );
        }
        self.persist(Event::OfficeSlotReleased {
            office_id: office_id.to_string(),
            date,
            parking: had_parking,
        })
        .await?;
        counter.booking_count = counter.booking_count.saturating_sub(1);
        if had_parking {
            counter.parking_count = counter.parking_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn reserve_user_slot(
        &self,
        email: &str,
        week_start: NaiveDate,
        quota: u32,
    ) -> Result<Reservation, EngineError> {
        check_email(email)?;
        let _gate = self.gate.read().await;
        let row = self.user_row(email, week_start).await?;

        let mut counter = row.lock().await;
        if counter.count >= quota {
            return Ok(Reservation::Full);
        }
        self.persist(Event::UserSlotReserved {
            email: email.to_string(),
            week_start,
        })
        .await?;
        counter.count += 1;
        Ok(Reservation::Reserved)
    }

    async fn release_user_slot(&self, email: &str, week_start: NaiveDate) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let row = self
            .user_counters
            .get(&UserWeek::new(email, week_start))
            .map(|r| r.value().clone())
            .ok_or_else(|| EngineError::NotFound(format!("user counter {email} {week_start}")))?;

        let mut counter = row.lock().await;
        if counter.count == 0 {
            warn!("releasing user slot below zero: {email} week of {week_start}");
        }
        self.persist(Event::UserSlotReleased {
            email: email.to_string(),
            week_start,
        })
        .await?;
        counter.count = counter.count.saturating_sub(1);
        Ok(())
    }

    async fn get_counts(
        &self,
        office_id: &str,
        dates: &[NaiveDate],
    ) -> Result<BTreeMap<NaiveDate, OfficeCounts>, EngineError> {
        if dates.len() > MAX_COUNT_DATES {
            return Err(EngineError::LimitExceeded("too many dates"));
        }
        let mut counts = BTreeMap::new();
        for &date in dates {
            let row = self
                .office_counters
                .get(&OfficeDay::new(office_id, date))
                .map(|r| r.value().clone());
            let value = match row {
                Some(row) => row.lock().await.counts(),
                None => OfficeCounts::default(),
            };
            counts.insert(date, value);
        }
        Ok(counts)
    }
}
