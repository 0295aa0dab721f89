//! Alert dispatch delivery — drains the `alert-dispatch` queue and sends the
//! resulting notifications to Telegram chats.

use async_trait::async_trait;
use buhbot_scheduler::{Job, JobHandler};
use serde_json::Value;
use teloxide::prelude::*;
use tracing::{info, warn};

/// Job handler registered on the `alert-dispatch` queue. Two payload shapes
/// land here: a per-recipient escalation notice (carries `recipient`) and an
/// in-chat breach notice (no `recipient`, delivered straight to the chat).
pub struct AlertDispatchHandler {
    bot: Bot,
}

impl AlertDispatchHandler {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn dispatch_to_recipient(&self, payload: &Value, request_id: &str, chat_id: i64, recipient: &str) {
        let alert_type = payload.get("alert_type").and_then(Value::as_str).unwrap_or("breach");
        let Ok(recipient_chat_id) = recipient.parse::<i64>() else {
            warn!(%request_id, recipient, "alert recipient is not a numeric telegram id, cannot deliver, skipping");
            return;
        };
        let text = format!("SLA {alert_type}: request {request_id} in chat {chat_id} needs attention.");
        crate::send::send_response(&self.bot, ChatId(recipient_chat_id), &text).await;
        info!(%request_id, recipient, alert_type, "alert dispatched");
    }

    async fn notify_chat(&self, request_id: &str, chat_id: i64, level: u64) {
        let text = format!("SLA breach: request {request_id} is still unanswered (escalation level {level}).");
        crate::send::send_response(&self.bot, ChatId(chat_id), &text).await;
        info!(%request_id, level, "in-chat breach notice sent");
    }
}

#[async_trait]
impl JobHandler for AlertDispatchHandler {
    async fn handle(&self, job: &Job) -> Result<(), String> {
        let payload: Value = serde_json::from_str(&job.payload).map_err(|e| e.to_string())?;
        let chat_id = payload.get("chat_id").and_then(Value::as_i64).ok_or("alert-dispatch job missing chat_id")?;
        let request_id = payload.get("request_id").and_then(Value::as_str).unwrap_or("?");

        match payload.get("recipient").and_then(Value::as_str) {
            Some(recipient) => self.dispatch_to_recipient(&payload, request_id, chat_id, recipient).await,
            None => {
                let level = payload.get("level").and_then(Value::as_u64).unwrap_or(0);
                self.notify_chat(request_id, chat_id, level).await;
            }
        }

        Ok(())
    }
}
