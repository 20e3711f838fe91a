use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dates;

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

// ── Configuration-owned types ───────────────────────────────────

/// A bookable office and its daily capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeQuota {
    pub id: String,
    pub name: String,
    /// Max desk bookings per day.
    pub quota: u32,
    /// Max parking bookings per day.
    #[serde(default)]
    pub parking_quota: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    pub can_manage_all_bookings: bool,
    /// Office ids this user may manage bookings for.
    pub offices_can_manage_bookings_for: Vec<String>,
}

impl UserPermissions {
    pub fn can_manage_office(&self, office_id: &str) -> bool {
        self.can_manage_all_bookings
            || self
                .offices_can_manage_bookings_for
                .iter()
                .any(|id| id == office_id)
    }

    pub fn manages_any_office(&self) -> bool {
        self.can_manage_all_bookings || !self.offices_can_manage_bookings_for.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Always stored lower-cased.
    pub email: String,
    /// Bookings allowed per week.
    pub quota: u32,
    pub auto_approved: bool,
    pub permissions: UserPermissions,
}

impl User {
    pub fn new(email: &str, quota: u32) -> Self {
        Self {
            email: normalize_email(email),
            quota,
            auto_approved: false,
            permissions: UserPermissions::default(),
        }
    }

    pub fn is(&self, email: &str) -> bool {
        self.email == normalize_email(email)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ── Stored records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub created: Ms,
    pub user: String,
    pub office_id: String,
    pub date: NaiveDate,
    pub parking: bool,
    pub reason_to_book: Option<String>,
}

impl Booking {
    /// Deterministic id for a fresh booking: `<officeId>_<yyyyMMdd>`.
    pub fn derive_id(office_id: &str, date: NaiveDate) -> String {
        format!("{office_id}_{}", date.format("%Y%m%d"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeCounts {
    pub booking_count: u32,
    pub parking_count: u32,
}

/// Per-office, per-day capacity counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeQuotaCounter {
    pub office_id: String,
    pub date: NaiveDate,
    pub booking_count: u32,
    pub parking_count: u32,
    /// Row may be garbage-collected once this day has passed.
    pub expires_on: NaiveDate,
}

impl OfficeQuotaCounter {
    pub fn new(office_id: &str, date: NaiveDate, expires_on: NaiveDate) -> Self {
        Self {
            office_id: office_id.to_string(),
            date,
            booking_count: 0,
            parking_count: 0,
            expires_on,
        }
    }

    pub fn counts(&self) -> OfficeCounts {
        OfficeCounts {
            booking_count: self.booking_count,
            parking_count: self.parking_count,
        }
    }

    /// Guard for the conditional increment.
    pub fn has_room(&self, office: &OfficeQuota, wants_parking: bool) -> bool {
        self.booking_count < office.quota
            && (!wants_parking || self.parking_count < office.parking_quota)
    }
}

/// Per-user, per-week booking counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuotaCounter {
    pub email: String,
    pub week_start: NaiveDate,
    pub count: u32,
    pub expires_on: NaiveDate,
}

impl UserQuotaCounter {
    pub fn new(email: &str, week_start: NaiveDate, expires_on: NaiveDate) -> Self {
        Self {
            email: email.to_string(),
            week_start,
            count: 0,
            expires_on,
        }
    }
}

/// Outcome of a conditional increment. Fullness is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    Full,
}

/// Outcome of a guarded record insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    Booking(Booking),
    /// The user already holds a booking for this day.
    Duplicate,
}

/// Filter for booking range reads. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingQuery {
    pub user: Option<String>,
    pub office_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BookingQuery {
    pub fn for_user(email: &str) -> Self {
        Self {
            user: Some(normalize_email(email)),
            ..Self::default()
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.user.as_ref().is_none_or(|u| *u == booking.user)
            && self.office_id.as_ref().is_none_or(|o| *o == booking.office_id)
            && self.from.is_none_or(|from| booking.date >= from)
            && self.to.is_none_or(|to| booking.date <= to)
    }
}

// ── Requests and external views ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeRef {
    pub id: String,
}

/// Incoming booking request. `id`/`created` are only set when replaying a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    pub office: OfficeRef,
    /// `yyyy-MM-dd`
    pub date: String,
    pub user: String,
    #[serde(default)]
    pub parking: Option<bool>,
    #[serde(default)]
    pub reason_to_book: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<Ms>,
}

impl CreateBooking {
    pub fn new(office_id: &str, date: &str, user: &str) -> Self {
        Self {
            office: OfficeRef {
                id: office_id.to_string(),
            },
            date: date.to_string(),
            user: user.to_string(),
            parking: None,
            reason_to_book: None,
            id: None,
            created: None,
        }
    }

    pub fn with_parking(mut self) -> Self {
        self.parking = Some(true);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason_to_book = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeView {
    pub id: String,
    pub name: String,
}

/// A booking as handed back to callers, with office metadata attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: String,
    pub created: Ms,
    pub user: String,
    pub date: String,
    pub office: OfficeView,
    pub parking: bool,
    pub reason_to_book: Option<String>,
}

impl BookingView {
    /// `office` is `None` when the booking's office has since been removed from config.
    pub fn new(booking: Booking, office: Option<&OfficeQuota>) -> Self {
        let office = match office {
            Some(o) => OfficeView {
                id: o.id.clone(),
                name: o.name.clone(),
            },
            None => OfficeView {
                id: booking.office_id.clone(),
                name: booking.office_id.clone(),
            },
        };
        Self {
            id: booking.id,
            created: booking.created,
            user: booking.user,
            date: dates::format_date(booking.date),
            office,
            parking: booking.parking,
            reason_to_book: booking.reason_to_book,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    pub date: String,
    pub available: u32,
    pub parking_available: u32,
}

// ── WAL record format ───────────────────────────────────────────

/// Durable state changes. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OfficeCounterCreated {
        office_id: String,
        date: NaiveDate,
        expires_on: NaiveDate,
    },
    OfficeSlotReserved {
        office_id: String,
        date: NaiveDate,
        parking: bool,
    },
    OfficeSlotReleased {
        office_id: String,
        date: NaiveDate,
        parking: bool,
    },
    OfficeCounterExpired {
        office_id: String,
        date: NaiveDate,
    },
    UserCounterCreated {
        email: String,
        week_start: NaiveDate,
        expires_on: NaiveDate,
    },
    UserSlotReserved {
        email: String,
        week_start: NaiveDate,
    },
    UserSlotReleased {
        email: String,
        week_start: NaiveDate,
    },
    UserCounterExpired {
        email: String,
        week_start: NaiveDate,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingDeleted {
        id: String,
        user: String,
    },
    /// Compaction output: a full counter row in one record.
    OfficeCounterSnapshot(OfficeQuotaCounter),
    UserCounterSnapshot(UserQuotaCounter),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        dates::parse_date(s).unwrap()
    }

    #[test]
    fn booking_id_is_office_and_compact_date() {
        assert_eq!(Booking::derive_id("london", day("2024-05-01")), "london_20240501");
    }

    #[test]
    fn emails_are_case_insensitive() {
        let user = User::new("  Alice@Example.COM ", 5);
        assert_eq!(user.email, "alice@example.com");
        assert!(user.is("ALICE@example.com"));
        assert!(!user.is("bob@example.com"));
    }

    #[test]
    fn office_manage_permission() {
        let mut perms = UserPermissions::default();
        assert!(!perms.can_manage_office("leeds"));
        perms.offices_can_manage_bookings_for.push("leeds".into());
        assert!(perms.can_manage_office("leeds"));
        assert!(!perms.can_manage_office("york"));
        perms.can_manage_all_bookings = true;
        assert!(perms.can_manage_office("york"));
    }

    #[test]
    fn counter_room_checks_both_dimensions() {
        let office = OfficeQuota {
            id: "o".into(),
            name: "O".into(),
            quota: 2,
            parking_quota: 1,
        };
        let mut counter = OfficeQuotaCounter::new("o", day("2024-05-01"), day("2024-05-31"));
        assert!(counter.has_room(&office, true));
        counter.booking_count = 1;
        counter.parking_count = 1;
        assert!(counter.has_room(&office, false));
        assert!(!counter.has_room(&office, true));
        counter.booking_count = 2;
        assert!(!counter.has_room(&office, false));
    }

    #[test]
    fn query_filters_compose() {
        let booking = Booking {
            id: "o_20240501".into(),
            created: 0,
            user: "a@x.com".into(),
            office_id: "o".into(),
            date: day("2024-05-01"),
            parking: false,
            reason_to_book: None,
        };
        assert!(BookingQuery::default().matches(&booking));
        assert!(BookingQuery::for_user("A@X.com").matches(&booking));
        let q = BookingQuery {
            from: Some(day("2024-05-02")),
            ..BookingQuery::default()
        };
        assert!(!q.matches(&booking));
        let q = BookingQuery {
            office_id: Some("p".into()),
            ..BookingQuery::default()
        };
        assert!(!q.matches(&booking));
    }

    #[test]
    fn view_falls_back_to_office_id() {
        let booking = Booking {
            id: "gone_20240501".into(),
            created: 1,
            user: "a@x.com".into(),
            office_id: "gone".into(),
            date: day("2024-05-01"),
            parking: true,
            reason_to_book: None,
        };
        let view = BookingView::new(booking, None);
        assert_eq!(view.office.name, "gone");
        assert_eq!(view.date, "2024-05-01");
    }

    #[test]
    fn request_parses_from_camel_case_json() {
        let req: CreateBooking = serde_json::from_str(
            r#"{"office":{"id":"o"},"date":"2024-05-01","user":"a@x.com","reasonToBook":"client visit"}"#,
        )
        .unwrap();
        assert_eq!(req.office.id, "o");
        assert_eq!(req.reason_to_book.as_deref(), Some("client visit"));
        assert_eq!(req.parking, None);
    }
}
