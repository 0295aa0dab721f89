use buhbot_core::types::{AccountantUserId, ChatId, TelegramUserId};
use buhbot_store::Db;
use tracing::{debug, warn};

/// Result of [`is_accountant_for_chat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyResult {
    pub is_accountant: bool,
    pub accountant_id: Option<AccountantUserId>,
}

impl IdentifyResult {
    fn no() -> Self {
        Self { is_accountant: false, accountant_id: None }
    }

    fn yes(accountant_id: Option<AccountantUserId>) -> Self {
        Self { is_accountant: true, accountant_id }
    }
}

/// Strips a leading `@` and lower-cases — the shared normalisation for
/// username comparisons across both ordered checks below.
fn fold(s: &str) -> String {
    s.strip_prefix('@').unwrap_or(s).to_lowercase()
}

/// §4.5: `isAccountantForChat(chatID, username?, userID)`.
///
/// Evaluation order, first match wins:
/// 0. `userID` in the chat's accountant ID set (secure).
/// 1. `userID` equals the assigned accountant's telegram ID.
/// 2. folded `username` in the chat's accountant username set (fallback).
/// 3. folded `username` equals the folded assigned accountant username.
///
/// A missing chat row, a missing user ID, or a missing username
/// short-circuits the checks that need them. Store failure fails closed:
/// `{false, null}`, logged — unidentified responders are treated as clients.
pub fn is_accountant_for_chat(
    db: &Db,
    chat_id: ChatId,
    username: Option<&str>,
    user_id: TelegramUserId,
) -> IdentifyResult {
    let chat = match buhbot_store::chats::find_chat(db, chat_id) {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            debug!(%chat_id, "identify: no chat row, treating as non-accountant");
            return IdentifyResult::no();
        }
        Err(err) => {
            warn!(%chat_id, error = %err, "identify: store failure, failing closed");
            return IdentifyResult::no();
        }
    };

    if chat.accountant_telegram_ids.contains(&user_id) {
        debug!(%chat_id, %user_id, "identify: matched chat.accountantTelegramIds");
        return IdentifyResult::yes(chat.assigned_accountant_id.clone());
    }

    if let Some(assigned_id) = chat.assigned_accountant_telegram_id {
        if assigned_id == user_id {
            debug!(%chat_id, %user_id, "identify: matched assignedAccountant.telegramId");
            return IdentifyResult::yes(chat.assigned_accountant_id.clone());
        }
    }

    if let Some(username) = username {
        let folded = fold(username);

        if chat.accountant_usernames.iter().any(|u| fold(u) == folded) {
            debug!(%chat_id, username = %folded, "identify: matched chat.accountantUsernames");
            return IdentifyResult::yes(chat.assigned_accountant_id.clone());
        }

        if let Some(assigned_username) = &chat.assigned_accountant_username {
            if fold(assigned_username) == folded {
                debug!(%chat_id, username = %folded, "identify: matched assignedAccountant.telegramUsername");
                return IdentifyResult::yes(chat.assigned_accountant_id.clone());
            }
        }
    }

    debug!(%chat_id, %user_id, "identify: no match, treating as client");
    IdentifyResult::no()
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_core::types::{Chat, ChatKind};
    use buhbot_store::db::open_test_db;
    use std::sync::{Arc, Mutex};

    fn chat_with(mutate: impl FnOnce(&mut Chat)) -> Chat {
        let mut chat = Chat {
            id: ChatId(1),
            title: None,
            kind: ChatKind::Group,
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
        };
        mutate(&mut chat);
        chat
    }

    fn db_with(chat: &Chat) -> Db {
        let db = Arc::new(Mutex::new(open_test_db()));
        buhbot_store::chats::upsert_chat(&db, chat).unwrap();
        db
    }

    #[test]
    fn matches_on_id_set() {
        let chat = chat_with(|c| c.accountant_telegram_ids = vec![TelegramUserId(42)]);
        let db = db_with(&chat);
        let result = is_accountant_for_chat(&db, ChatId(1), None, TelegramUserId(42));
        assert!(result.is_accountant);
    }

    #[test]
    fn matches_on_assigned_id() {
        let chat = chat_with(|c| c.assigned_accountant_telegram_id = Some(TelegramUserId(7)));
        let db = db_with(&chat);
        let result = is_accountant_for_chat(&db, ChatId(1), None, TelegramUserId(7));
        assert!(result.is_accountant);
    }

    #[test]
    fn matches_on_folded_username_set() {
        let chat = chat_with(|c| c.accountant_usernames = vec!["Alice".to_string()]);
        let db = db_with(&chat);
        let result = is_accountant_for_chat(&db, ChatId(1), Some("@alice"), TelegramUserId(999));
        assert!(result.is_accountant);
    }

    #[test]
    fn matches_on_folded_assigned_username() {
        let chat = chat_with(|c| c.assigned_accountant_username = Some("@Bob".to_string()));
        let db = db_with(&chat);
        let result = is_accountant_for_chat(&db, ChatId(1), Some("bob"), TelegramUserId(999));
        assert!(result.is_accountant);
    }

    #[test]
    fn no_match_treats_as_client() {
        let chat = chat_with(|_| {});
        let db = db_with(&chat);
        let result = is_accountant_for_chat(&db, ChatId(1), Some("nobody"), TelegramUserId(1));
        assert!(!result.is_accountant);
        assert!(result.accountant_id.is_none());
    }

    #[test]
    fn missing_chat_fails_closed() {
        let db = Arc::new(Mutex::new(open_test_db()));
        let result = is_accountant_for_chat(&db, ChatId(999), None, TelegramUserId(1));
        assert!(!result.is_accountant);
    }
}
