use chrono::NaiveDate;

use crate::dates;
use crate::model::*;

use super::{Engine, EngineError, OfficeDay, UserWeek};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub office_rows: usize,
    pub user_rows: usize,
    pub bookings: usize,
}

impl ExpiryReport {
    pub fn total(&self) -> usize {
        self.office_rows + self.user_rows + self.bookings
    }
}

impl Engine {
    /// Drop counter rows and bookings whose retention ended before `today`.
    pub async fn expire(&self, today: NaiveDate) -> Result<ExpiryReport, EngineError> {
        let _gate = self.gate.read().await;
        let mut report = ExpiryReport::default();

        // Clone the row handles out first; no shard guard may be held across an await.
        let offices: Vec<_> = self
            .office_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (key, row) in offices {
            let counter = row.lock().await;
            if counter.expires_on >= today {
                continue;
            }
            let OfficeDay { office_id, date } = key.clone();
            self.persist(Event::OfficeCounterExpired { office_id, date }).await?;
            self.office_counters.remove(&key);
            report.office_rows += 1;
        }

        let users: Vec<_> = self
            .user_counters
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (key, row) in users {
            let counter = row.lock().await;
            if counter.expires_on >= today {
                continue;
            }
            let UserWeek { email, week_start } = key.clone();
            self.persist(Event::UserCounterExpired { email, week_start }).await?;
            self.user_counters.remove(&key);
            report.user_rows += 1;
        }

        let mut table = self.bookings.write().await;
        let stale_bookings: Vec<(String, String)> = table
            .iter()
            .filter(|b| dates::retain_until(b.date, self.retention_days) < today)
            .map(|b| (b.id.clone(), b.user.clone()))
            .collect();
        for (id, user) in stale_bookings {
            self.persist(Event::BookingDeleted {
                id: id.clone(),
                user: user.clone(),
            })
            .await?;
            table.remove(&user, &id);
            report.bookings += 1;
        }

        Ok(report)
    }

    /// Rewrite the WAL as one snapshot record per live row plus one per booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;

        let mut events = Vec::new();
        let offices: Vec<_> = self.office_counters.iter().map(|e| e.value().clone()).collect();
        for row in offices {
            events.push(Event::OfficeCounterSnapshot(row.lock().await.clone()));
        }
        let users: Vec<_> = self.user_counters.iter().map(|e| e.value().clone()).collect();
        for row in users {
            events.push(Event::UserCounterSnapshot(row.lock().await.clone()));
        }
        {
            let table = self.bookings.read().await;
            events.extend(table.iter().map(|b| Event::BookingCreated { booking: b.clone() }));
        }

        self.wal.rewrite(events).await?;
        Ok(())
    }
}
