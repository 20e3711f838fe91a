use chrono::{Datelike, Days, Local, NaiveDate, Weekday};

use crate::config::Config;
use crate::model::Ms;

/// Canonical wire format for booking dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Strict `yyyy-MM-dd` parse. Rejects impossible days such as `2024-02-30`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    // chrono tolerates padding spaces, short fields and signed years
    let bytes = s.as_bytes();
    if bytes.len() != 10 {
        return None;
    }
    let canonical = bytes.iter().enumerate().all(|(i, b)| match i {
        4 | 7 => *b == b'-',
        _ => b.is_ascii_digit(),
    });
    if !canonical {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `dd/MM/yyyy`, as shown in notification emails.
pub fn display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date.week(Weekday::Mon).first_day()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Every date a user may currently book: today through `advance_booking_days`
/// ahead, minus weekends when the policy excludes them.
pub fn available_dates(config: &Config, today: NaiveDate) -> Vec<NaiveDate> {
    today
        .iter_days()
        .take(config.advance_booking_days as usize + 1)
        .filter(|d| !(config.exclude_weekends && is_weekend(*d)))
        .collect()
}

pub fn is_bookable(config: &Config, today: NaiveDate, date: NaiveDate) -> bool {
    if date < today || (config.exclude_weekends && is_weekend(date)) {
        return false;
    }
    (date - today).num_days() <= config.advance_booking_days as i64
}

pub fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(days as u64))
        .unwrap_or(NaiveDate::MAX)
}

/// Office counter rows and booking records live `retention_days` past their day.
pub fn retain_until(date: NaiveDate, retention_days: u32) -> NaiveDate {
    add_days(date, retention_days)
}

/// User counter rows are kept until `retention_days` after the week ends.
pub fn retain_week_until(week_start: NaiveDate, retention_days: u32) -> NaiveDate {
    add_days(week_start, 6 + retention_days)
}

/// Source of "today". Fixed clocks make the bookable window deterministic in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(&self) -> NaiveDate {
        match self {
            Clock::System => Local::now().date_naive(),
            Clock::Fixed(date) => *date,
        }
    }

    pub fn now_ms(&self) -> Ms {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_rejects_impossible_and_sloppy_dates() {
        assert!(parse_date("2024-02-30").is_none());
        assert!(parse_date("2024-2-3").is_none());
        assert!(parse_date("01/05/2024").is_none());
        assert!(parse_date("").is_none());
        assert!(parse_date("2024-05- 1").is_none());
        assert!(parse_date("2024- 5-01").is_none());
        assert!(parse_date(" 2024-5-01").is_none());
        assert!(parse_date("+024-05-01").is_none());
        assert!(parse_date("-024-05-01").is_none());
        assert!(parse_date("2024/05/01").is_none());
        assert_eq!(parse_date("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29));
    }

    #[test]
    fn week_starts_on_monday() {
        // 2024-05-01 is a Wednesday
        assert_eq!(week_start(day("2024-05-01")), day("2024-04-29"));
        assert_eq!(week_start(day("2024-04-29")), day("2024-04-29"));
        assert_eq!(week_start(day("2024-05-05")), day("2024-04-29"));
    }

    #[test]
    fn window_skips_weekends_when_configured() {
        let mut config = Config::default();
        config.advance_booking_days = 6;
        config.exclude_weekends = true;
        // Friday through the following Thursday
        let dates = available_dates(&config, day("2024-05-03"));
        assert_eq!(dates.len(), 5);
        assert!(!dates.contains(&day("2024-05-04")));
        assert!(dates.contains(&day("2024-05-09")));

        config.exclude_weekends = false;
        assert_eq!(available_dates(&config, day("2024-05-03")).len(), 7);
    }

    #[test]
    fn bookable_matches_window() {
        let mut config = Config::default();
        config.advance_booking_days = 14;
        let today = day("2024-05-01");
        for date in available_dates(&config, today) {
            assert!(is_bookable(&config, today, date));
        }
        assert!(!is_bookable(&config, today, day("2024-04-30")));
        assert!(!is_bookable(&config, today, day("2024-05-16")));
        assert!(!is_bookable(&config, today, day("2024-05-04")));
    }

    #[test]
    fn retention_offsets() {
        assert_eq!(retain_until(day("2024-05-01"), 30), day("2024-05-31"));
        assert_eq!(retain_week_until(day("2024-04-29"), 1), day("2024-05-06"));
    }

    #[test]
    fn display_format() {
        assert_eq!(display_date(day("2024-05-01")), "01/05/2024");
    }
}
