use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::config::Config;
use crate::engine::EngineError;
use crate::model::{normalize_email, User, UserPermissions};
use crate::store::UserDirectory;

/// Users resolved from configuration: everyone gets the default weekly quota
/// unless overridden; admins and auto-approvals are explicit lists.
#[derive(Debug, Clone)]
pub struct ConfigUserDirectory {
    default_quota: u32,
    quotas: HashMap<String, u32>,
    auto_approved: HashSet<String>,
    admins: HashSet<String>,
    office_admins: HashMap<String, Vec<String>>,
}

impl ConfigUserDirectory {
    pub fn new(config: &Config) -> Self {
        Self {
            default_quota: config.default_weekly_quota,
            quotas: normalize_keys(&config.user_quotas),
            auto_approved: config.auto_approved_users.iter().map(|e| normalize_email(e)).collect(),
            admins: config.system_admins.iter().map(|e| normalize_email(e)).collect(),
            office_admins: normalize_keys(&config.office_admins),
        }
    }

    pub fn lookup(&self, email: &str) -> User {
        let email = normalize_email(email);
        User {
            quota: self.quotas.get(&email).copied().unwrap_or(self.default_quota),
            auto_approved: self.auto_approved.contains(&email),
            permissions: UserPermissions {
                can_manage_all_bookings: self.admins.contains(&email),
                offices_can_manage_bookings_for: self
                    .office_admins
                    .get(&email)
                    .cloned()
                    .unwrap_or_default(),
            },
            email,
        }
    }
}

fn normalize_keys<V: Clone>(map: &HashMap<String, V>) -> HashMap<String, V> {
    map.iter()
        .map(|(k, v)| (normalize_email(k), v.clone()))
        .collect()
}

#[async_trait]
impl UserDirectory for ConfigUserDirectory {
    async fn get_user(&self, email: &str) -> Result<User, EngineError> {
        Ok(self.lookup(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_and_overrides() {
        let mut config = Config::default();
        config.default_weekly_quota = 3;
        config.user_quotas.insert("Heavy@X.com".into(), 5);
        config.auto_approved_users.push("boss@x.com".into());
        config.system_admins.push("boss@x.com".into());
        config
            .office_admins
            .insert("lead@x.com".into(), vec!["leeds".into()]);
        let users = ConfigUserDirectory::new(&config);

        let plain = users.get_user("someone@x.com").await.unwrap();
        assert_eq!(plain.quota, 3);
        assert!(!plain.auto_approved);
        assert!(!plain.permissions.can_manage_all_bookings);

        assert_eq!(users.get_user("heavy@x.com").await.unwrap().quota, 5);

        let boss = users.get_user("BOSS@x.com").await.unwrap();
        assert_eq!(boss.email, "boss@x.com");
        assert!(boss.auto_approved);
        assert!(boss.permissions.can_manage_all_bookings);

        let lead = users.get_user("lead@x.com").await.unwrap();
        assert!(lead.permissions.can_manage_office("leeds"));
        assert!(!lead.permissions.can_manage_office("york"));
    }
}
