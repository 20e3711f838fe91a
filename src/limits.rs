//! Hard input limits. Requests beyond these are rejected before touching the store.

pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_OFFICE_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_BOOKING_ID_LEN: usize = 256;
/// Upper bound on dates in a single `get_counts` call.
pub const MAX_COUNT_DATES: usize = 366;
