use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::MAX_COUNT_DATES;
use crate::model::OfficeQuota;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var}: malformed JSON: {source}")]
    Json {
        var: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate office id {0:?}")]
    DuplicateOffice(String),
}

/// Runtime configuration, read from `OFFICE_BOOKER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment tag. Emails are never sent when this is `test`.
    pub env: String,
    pub office_quotas: Vec<OfficeQuota>,
    pub advance_booking_days: u32,
    pub data_retention_days: u32,
    pub exclude_weekends: bool,
    pub notification_to_address: Option<String>,
    pub from_address: Option<String>,
    pub reason_to_book_required: bool,
    pub default_weekly_quota: u32,
    pub user_quotas: HashMap<String, u32>,
    pub auto_approved_users: Vec<String>,
    pub system_admins: Vec<String>,
    /// email → office ids that user may manage.
    pub office_admins: HashMap<String, Vec<String>>,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    /// Seconds between retention sweeps.
    pub reap_interval_secs: u64,
    pub restore_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "local".into(),
            office_quotas: Vec::new(),
            advance_booking_days: 14,
            data_retention_days: 30,
            exclude_weekends: true,
            notification_to_address: None,
            from_address: None,
            reason_to_book_required: false,
            default_weekly_quota: 5,
            user_quotas: HashMap::new(),
            auto_approved_users: Vec::new(),
            system_admins: Vec::new(),
            office_admins: HashMap::new(),
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            reap_interval_secs: 3600,
            restore_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            env: get("OFFICE_BOOKER_ENV").unwrap_or(defaults.env),
            office_quotas: json(&get, "OFFICE_BOOKER_OFFICE_QUOTAS")?.unwrap_or_default(),
            advance_booking_days: parsed(&get, "OFFICE_BOOKER_ADVANCE_BOOKING_DAYS")?
                .unwrap_or(defaults.advance_booking_days),
            data_retention_days: parsed(&get, "OFFICE_BOOKER_DATA_RETENTION_DAYS")?
                .unwrap_or(defaults.data_retention_days),
            exclude_weekends: parsed(&get, "OFFICE_BOOKER_EXCLUDE_WEEKENDS")?
                .unwrap_or(defaults.exclude_weekends),
            notification_to_address: non_empty(get("OFFICE_BOOKER_NOTIFICATION_TO_ADDRESS")),
            from_address: non_empty(get("OFFICE_BOOKER_FROM_ADDRESS")),
            reason_to_book_required: parsed(&get, "OFFICE_BOOKER_REASON_TO_BOOK_REQUIRED")?
                .unwrap_or(defaults.reason_to_book_required),
            default_weekly_quota: parsed(&get, "OFFICE_BOOKER_DEFAULT_WEEKLY_QUOTA")?
                .unwrap_or(defaults.default_weekly_quota),
            user_quotas: json(&get, "OFFICE_BOOKER_USER_QUOTAS")?.unwrap_or_default(),
            auto_approved_users: list(get("OFFICE_BOOKER_AUTO_APPROVED_USERS")),
            system_admins: list(get("OFFICE_BOOKER_SYSTEM_ADMINS")),
            office_admins: json(&get, "OFFICE_BOOKER_OFFICE_ADMINS")?.unwrap_or_default(),
            data_dir: get("OFFICE_BOOKER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&get, "OFFICE_BOOKER_METRICS_PORT")?,
            compact_threshold: parsed(&get, "OFFICE_BOOKER_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            reap_interval_secs: parsed(&get, "OFFICE_BOOKER_REAP_INTERVAL_SECS")?
                .unwrap_or(defaults.reap_interval_secs),
            restore_file: non_empty(get("OFFICE_BOOKER_RESTORE_FILE")).map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // the whole window must fit in one counts read
        if self.advance_booking_days as usize >= MAX_COUNT_DATES {
            return Err(ConfigError::Invalid {
                var: "OFFICE_BOOKER_ADVANCE_BOOKING_DAYS",
                value: self.advance_booking_days.to_string(),
            });
        }
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "OFFICE_BOOKER_REAP_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        for (i, office) in self.office_quotas.iter().enumerate() {
            if self.office_quotas[..i].iter().any(|o| o.id == office.id) {
                return Err(ConfigError::DuplicateOffice(office.id.clone()));
            }
        }
        Ok(())
    }

    pub fn office(&self, id: &str) -> Option<&OfficeQuota> {
        self.office_quotas.iter().find(|o| o.id == id)
    }

    pub fn sends_email(&self) -> bool {
        self.env != "test"
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match non_empty(get(var)) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn json<T: serde::de::DeserializeOwned>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match non_empty(get(var)) {
        None => Ok(None),
        Some(value) => serde_json::from_str(&value)
            .map(Some)
            .map_err(|source| ConfigError::Json { var, source }),
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(crate::model::normalize_email)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.advance_booking_days, 14);
        assert_eq!(config.data_retention_days, 30);
        assert!(config.office_quotas.is_empty());
        assert!(config.notification_to_address.is_none());
        assert!(config.sends_email());
        assert_eq!(config.reap_interval_secs, 3600);
    }

    #[test]
    fn booking_window_must_fit_one_counts_read() {
        let longest = (MAX_COUNT_DATES - 1).to_string();
        let config = Config::from_lookup(lookup(&[("OFFICE_BOOKER_ADVANCE_BOOKING_DAYS", &longest)]))
            .unwrap();
        assert_eq!(config.advance_booking_days as usize, MAX_COUNT_DATES - 1);
        let today = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(crate::dates::available_dates(&config, today).len() <= MAX_COUNT_DATES);

        let err = Config::from_lookup(lookup(&[("OFFICE_BOOKER_ADVANCE_BOOKING_DAYS", "600")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "OFFICE_BOOKER_ADVANCE_BOOKING_DAYS", .. }
        ));
    }

    #[test]
    fn reap_interval_is_parsed_and_checked() {
        let config = Config::from_lookup(lookup(&[("OFFICE_BOOKER_REAP_INTERVAL_SECS", "60")]))
            .unwrap();
        assert_eq!(config.reap_interval_secs, 60);

        let err = Config::from_lookup(lookup(&[("OFFICE_BOOKER_REAP_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("OFFICE_BOOKER_REAP_INTERVAL_SECS"));
        assert!(Config::from_lookup(lookup(&[("OFFICE_BOOKER_REAP_INTERVAL_SECS", "0")])).is_err());
    }

    #[test]
    fn reads_offices_and_lists() {
        let config = Config::from_lookup(lookup(&[
            (
                "OFFICE_BOOKER_OFFICE_QUOTAS",
                r#"[{"id":"leeds","name":"Leeds","quota":10,"parkingQuota":2}]"#,
            ),
            ("OFFICE_BOOKER_SYSTEM_ADMINS", "Boss@X.com, ops@x.com,"),
            ("OFFICE_BOOKER_REASON_TO_BOOK_REQUIRED", "true"),
            ("OFFICE_BOOKER_ENV", "test"),
        ]))
        .unwrap();
        let leeds = config.office("leeds").unwrap();
        assert_eq!(leeds.quota, 10);
        assert_eq!(leeds.parking_quota, 2);
        assert_eq!(config.system_admins, vec!["boss@x.com", "ops@x.com"]);
        assert!(config.reason_to_book_required);
        assert!(!config.sends_email());
    }

    #[test]
    fn rejects_bad_numbers_and_json() {
        let err = Config::from_lookup(lookup(&[("OFFICE_BOOKER_ADVANCE_BOOKING_DAYS", "two")]))
            .unwrap_err();
        assert!(err.to_string().contains("OFFICE_BOOKER_ADVANCE_BOOKING_DAYS"));

        let err = Config::from_lookup(lookup(&[("OFFICE_BOOKER_OFFICE_QUOTAS", "[{")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn rejects_duplicate_office_ids() {
        let err = Config::from_lookup(lookup(&[(
            "OFFICE_BOOKER_OFFICE_QUOTAS",
            r#"[{"id":"a","name":"A","quota":1},{"id":"a","name":"B","quota":1}]"#,
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOffice(id) if id == "a"));
    }
}
