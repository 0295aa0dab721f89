use std::sync::Mutex;

use buhbot_core::types::{Chat, ClientTier, GlobalSettings, RecipientSource, TelegramUserId};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, warn};

use buhbot_store::Db;

const CACHE_TTL_MINUTES: i64 = 5;

struct CacheSlot {
    value: Option<GlobalSettings>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Merges chat-local, tier-default and global configuration layers and
/// caches the global row for [`CACHE_TTL_MINUTES`]. Intended as a
/// process-wide singleton (see SPEC_FULL.md §9's configuration-resolver
/// redesign note): construct once, share via `Arc`, and call
/// [`ConfigResolver::invalidate`] after any admin write to `GlobalSettings`.
pub struct ConfigResolver {
    db: Db,
    cache: Mutex<CacheSlot>,
}

impl ConfigResolver {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            cache: Mutex::new(CacheSlot { value: None, loaded_at: None }),
        }
    }

    /// Clears the cached slot and its timestamp; the next read re-hits the store.
    pub fn invalidate(&self) {
        let mut slot = self.cache.lock().unwrap();
        slot.value = None;
        slot.loaded_at = None;
    }

    fn global_settings(&self) -> GlobalSettings {
        {
            let slot = self.cache.lock().unwrap();
            if let (Some(value), Some(loaded_at)) = (&slot.value, slot.loaded_at) {
                if Utc::now() - loaded_at < Duration::minutes(CACHE_TTL_MINUTES) {
                    return value.clone();
                }
            }
        }

        match buhbot_store::settings::get_global_settings(&self.db) {
            Ok(fresh) => {
                let mut slot = self.cache.lock().unwrap();
                slot.value = Some(fresh.clone());
                slot.loaded_at = Some(Utc::now());
                fresh
            }
            Err(err) => {
                let slot = self.cache.lock().unwrap();
                if let Some(stale) = &slot.value {
                    warn!(error = %err, "global settings store read failed, serving stale cache");
                    stale.clone()
                } else {
                    error!(error = %err, "global settings store read failed with no cache, using fallback");
                    GlobalSettings::default()
                }
            }
        }
    }

    /// SLA threshold in minutes for `chat`: chat-local override, else the
    /// fixed tier-default mapping, else the global default.
    pub fn sla_threshold_minutes(&self, chat: &Chat) -> u32 {
        if let Some(minutes) = chat.sla_threshold_minutes {
            return minutes;
        }
        if let Some(tier) = chat.client_tier {
            return tier.default_threshold_minutes();
        }
        self.global_settings().default_sla_threshold_minutes
    }

    pub fn max_escalations(&self) -> u32 {
        self.global_settings().max_escalations
    }

    pub fn escalation_interval_minutes(&self) -> u32 {
        self.global_settings().escalation_interval_minutes
    }

    pub fn sla_warning_percent(&self) -> u8 {
        self.global_settings().sla_warning_percent
    }

    pub fn ai_confidence_threshold(&self) -> f64 {
        self.global_settings().ai_confidence_threshold
    }

    pub fn global_manager_telegram_ids(&self) -> Vec<TelegramUserId> {
        self.global_settings().global_manager_telegram_ids
    }

    /// §4.3's `getRecipientsByLevel`: level 1 prefers accountants, falling
    /// back to chat managers then global managers; level ≥ 2 unions managers
    /// and accountants, deduplicated.
    pub fn recipients_by_level(
        &self,
        chat_managers: &[String],
        accountants: &[String],
        level: u32,
    ) -> (Vec<String>, RecipientSource) {
        if level <= 1 {
            if !accountants.is_empty() {
                return (accountants.to_vec(), RecipientSource::Accountant);
            }
            if !chat_managers.is_empty() {
                return (chat_managers.to_vec(), RecipientSource::Manager);
            }
            let globals: Vec<String> = self
                .global_manager_telegram_ids()
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            return (globals, RecipientSource::Fallback);
        }

        let mut union: Vec<String> = Vec::new();
        for r in chat_managers.iter().chain(accountants.iter()) {
            if !union.contains(r) {
                union.push(r.clone());
            }
        }
        (union, RecipientSource::Both)
    }
}

pub fn tier_default_minutes(tier: ClientTier) -> u32 {
    tier.default_threshold_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_core::types::ChatId;
    use buhbot_store::db::open_test_db;
    use std::sync::{Arc, Mutex as StdMutex};

    fn test_db() -> Db {
        Arc::new(StdMutex::new(open_test_db()))
    }

    fn bare_chat() -> Chat {
        Chat {
            id: ChatId(1),
            title: None,
            kind: buhbot_core::types::ChatKind::Group,
            monitoring_enabled: true,
            sla_enabled: true,
            notify_in_chat_on_breach: false,
            is_24x7_mode: false,
            sla_threshold_minutes: None,
            client_tier: None,
            accountant_telegram_ids: Vec::new(),
            accountant_usernames: Vec::new(),
            accountant_username: None,
            assigned_accountant_id: None,
            assigned_accountant_telegram_id: None,
            assigned_accountant_username: None,
            manager_telegram_ids: Vec::new(),
            deleted_at: None,
        }
    }

    #[test]
    fn chat_local_override_wins() {
        let resolver = ConfigResolver::new(test_db());
        let mut chat = bare_chat();
        chat.sla_threshold_minutes = Some(15);
        chat.client_tier = Some(ClientTier::Basic);
        assert_eq!(resolver.sla_threshold_minutes(&chat), 15);
    }

    #[test]
    fn tier_default_used_when_no_override() {
        let resolver = ConfigResolver::new(test_db());
        let mut chat = bare_chat();
        chat.client_tier = Some(ClientTier::Vip);
        assert_eq!(resolver.sla_threshold_minutes(&chat), 30);
    }

    #[test]
    fn global_default_used_when_no_override_or_tier() {
        let resolver = ConfigResolver::new(test_db());
        let chat = bare_chat();
        assert_eq!(resolver.sla_threshold_minutes(&chat), 60);
    }

    #[test]
    fn level_one_prefers_accountants_then_managers_then_global() {
        let resolver = ConfigResolver::new(test_db());
        let (recipients, source) = resolver.recipients_by_level(&["mgr".to_string()], &["acct".to_string()], 1);
        assert_eq!(recipients, vec!["acct".to_string()]);
        assert_eq!(source, RecipientSource::Accountant);

        let (recipients, source) = resolver.recipients_by_level(&["mgr".to_string()], &[], 1);
        assert_eq!(recipients, vec!["mgr".to_string()]);
        assert_eq!(source, RecipientSource::Manager);

        let (recipients, source) = resolver.recipients_by_level(&[], &[], 1);
        assert!(recipients.is_empty());
        assert_eq!(source, RecipientSource::Fallback);
    }

    #[test]
    fn level_two_unions_and_dedupes() {
        let resolver = ConfigResolver::new(test_db());
        let (recipients, source) = resolver.recipients_by_level(
            &["mgr".to_string(), "shared".to_string()],
            &["acct".to_string(), "shared".to_string()],
            2,
        );
        assert_eq!(recipients, vec!["mgr".to_string(), "shared".to_string(), "acct".to_string()]);
        assert_eq!(source, RecipientSource::Both);
    }

    #[test]
    fn invalidate_forces_a_fresh_read() {
        let db = test_db();
        let resolver = ConfigResolver::new(db.clone());
        let _ = resolver.global_settings();
        resolver.invalidate();
        let slot = resolver.cache.lock().unwrap();
        assert!(slot.value.is_none());
        assert!(slot.loaded_at.is_none());
    }
}
