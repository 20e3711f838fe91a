mod counters;
mod error;
mod maintenance;
mod queries;
mod records;

pub use error::EngineError;
pub use maintenance::ExpiryReport;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::dates;
use crate::model::*;
use crate::wal::{Wal, WalHandle};

pub type SharedOfficeCounter = Arc<Mutex<OfficeQuotaCounter>>;
pub type SharedUserCounter = Arc<Mutex<UserQuotaCounter>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfficeDay {
    pub office_id: String,
    pub date: NaiveDate,
}

impl OfficeDay {
    pub fn new(office_id: &str, date: NaiveDate) -> Self {
        Self {
            office_id: office_id.to_string(),
            date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserWeek {
    pub email: String,
    pub week_start: NaiveDate,
}

impl UserWeek {
    pub fn new(email: &str, week_start: NaiveDate) -> Self {
        Self {
            email: email.to_string(),
            week_start,
        }
    }
}

/// Booking records indexed by user then day, so the (user, date) guard is one lookup.
#[derive(Debug, Default)]
pub(crate) struct BookingTable {
    by_user: HashMap<String, BTreeMap<NaiveDate, Booking>>,
}

impl BookingTable {
    pub(crate) fn on_day(&self, user: &str, date: NaiveDate) -> Option<&Booking> {
        self.by_user.get(user).and_then(|days| days.get(&date))
    }

    pub(crate) fn find(&self, user: &str, id: &str) -> Option<&Booking> {
        self.by_user
            .get(user)
            .and_then(|days| days.values().find(|b| b.id == id))
    }

    pub(crate) fn insert(&mut self, booking: Booking) {
        self.by_user
            .entry(booking.user.clone())
            .or_default()
            .insert(booking.date, booking);
    }

    pub(crate) fn remove(&mut self, user: &str, id: &str) -> Option<Booking> {
        let days = self.by_user.get_mut(user)?;
        let date = days.values().find(|b| b.id == id)?.date;
        let removed = days.remove(&date);
        if days.is_empty() {
            self.by_user.remove(user);
        }
        removed
    }

    pub(crate) fn for_user(&self, user: &str) -> impl Iterator<Item = &Booking> {
        self.by_user.get(user).into_iter().flat_map(|days| days.values())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.by_user.values().flat_map(|days| days.values())
    }

    pub(crate) fn len(&self) -> usize {
        self.by_user.values().map(BTreeMap::len).sum()
    }
}

/// Durable, in-process quota counter and booking record store.
///
/// Counter rows sit behind their own mutex inside a `DashMap`; every mutation
/// appends to the WAL while holding the row lock, then applies in memory.
pub struct Engine {
    pub(super) office_counters: DashMap<OfficeDay, SharedOfficeCounter>,
    pub(super) user_counters: DashMap<UserWeek, SharedUserCounter>,
    pub(super) bookings: RwLock<BookingTable>,
    pub(super) wal: WalHandle,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can fall between the snapshot and the log rewrite.
    /// Always taken before any row or table lock.
    pub(super) gate: RwLock<()>,
    pub(super) retention_days: u32,
}

/// State rebuilt from the log before any lock exists.
#[derive(Default)]
struct Replayed {
    offices: HashMap<OfficeDay, OfficeQuotaCounter>,
    users: HashMap<UserWeek, UserQuotaCounter>,
    bookings: BookingTable,
}

impl Replayed {
    fn office(&mut self, office_id: &str, date: NaiveDate, retention_days: u32) -> &mut OfficeQuotaCounter {
        self.offices
            .entry(OfficeDay::new(office_id, date))
            .or_insert_with(|| {
                OfficeQuotaCounter::new(office_id, date, dates::retain_until(date, retention_days))
            })
    }

    fn user(&mut self, email: &str, week_start: NaiveDate, retention_days: u32) -> &mut UserQuotaCounter {
        self.users
            .entry(UserWeek::new(email, week_start))
            .or_insert_with(|| {
                UserQuotaCounter::new(
                    email,
                    week_start,
                    dates::retain_week_until(week_start, retention_days),
                )
            })
    }

    /// Tolerant of a missing creation record: a reserve recreates its row.
    fn apply(&mut self, event: Event, retention_days: u32) {
        match event {
            Event::OfficeCounterCreated { office_id, date, expires_on } => {
                self.office(&office_id, date, retention_days).expires_on = expires_on;
            }
            Event::OfficeSlotReserved { office_id, date, parking } => {
                let row = self.office(&office_id, date, retention_days);
                row.booking_count += 1;
                if parking {
                    row.parking_count += 1;
                }
            }
            Event::OfficeSlotReleased { office_id, date, parking } => {
                let row = self.office(&office_id, date, retention_days);
                row.booking_count = row.booking_count.saturating_sub(1);
                if parking {
                    row.parking_count = row.parking_count.saturating_sub(1);
                }
            }
            Event::OfficeCounterExpired { office_id, date } => {
                self.offices.remove(&OfficeDay::new(&office_id, date));
            }
            Event::UserCounterCreated { email, week_start, expires_on } => {
                self.user(&email, week_start, retention_days).expires_on = expires_on;
            }
            Event::UserSlotReserved { email, week_start } => {
                self.user(&email, week_start, retention_days).count += 1;
            }
            Event::UserSlotReleased { email, week_start } => {
                let row = self.user(&email, week_start, retention_days);
                row.count = row.count.saturating_sub(1);
            }
            Event::UserCounterExpired { email, week_start } => {
                self.users.remove(&UserWeek::new(&email, week_start));
            }
            Event::BookingCreated { booking } => self.bookings.insert(booking),
            Event::BookingDeleted { id, user } => {
                self.bookings.remove(&user, &id);
            }
            Event::OfficeCounterSnapshot(row) => {
                self.offices.insert(OfficeDay::new(&row.office_id, row.date), row);
            }
            Event::UserCounterSnapshot(row) => {
                self.users.insert(UserWeek::new(&row.email, row.week_start), row);
            }
        }
    }
}

impl Engine {
    /// Replay the log at `wal_path`, then start its group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path, retention_days: u32) -> std::io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let replayed_events = events.len();
        let mut state = Replayed::default();
        for event in events {
            state.apply(event, retention_days);
        }

        let office_counters = DashMap::new();
        for (key, row) in state.offices {
            office_counters.insert(key, Arc::new(Mutex::new(row)));
        }
        let user_counters = DashMap::new();
        for (key, row) in state.users {
            user_counters.insert(key, Arc::new(Mutex::new(row)));
        }

        let engine = Self {
            office_counters,
            user_counters,
            bookings: RwLock::new(state.bookings),
            wal: WalHandle::spawn(Wal::open(wal_path)?),
            gate: RwLock::new(()),
            retention_days,
        };
        info!(
            "engine opened: {replayed_events} events replayed, {} office rows, {} user rows",
            engine.office_counters.len(),
            engine.user_counters.len(),
        );
        Ok(engine)
    }

    /// Durably log `event`. Callers hold the gate and the lock of whatever the event touches.
    pub(super) async fn persist(&self, event: Event) -> Result<(), EngineError> {
        self.wal
            .append(event)
            .await
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }
}
