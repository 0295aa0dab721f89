//! Telegram message handler registered in the teloxide Dispatcher.

use std::sync::Arc;

use buhbot_core::types::{ChatId, TelegramUserId};
use buhbot_ingress::{process_message, IncomingMessage, IngressContext};
use chrono::Utc;
use teloxide::prelude::*;
use tracing::debug;

/// Main message handler registered in the teloxide Dispatcher.
///
/// Runs for every incoming `Message`. Filters to non-bot senders in
/// group/supergroup chats, translates into an [`IncomingMessage`], and hands
/// it to the ingress pipeline. Never replies inline — the pipeline's only
/// outward effect is scheduling jobs that `AlertDispatchHandler` later drains.
pub async fn handle_message(msg: Message, ctx: Arc<IngressContext>) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    if text.is_empty() {
        return Ok(());
    }

    let incoming = IncomingMessage {
        chat_id: ChatId(msg.chat.id.0),
        message_id: msg.id.0 as i64,
        from_user_id: TelegramUserId(from.id.0 as i64),
        from_username: from.username.clone(),
        text,
        reply_to_message_id: msg.reply_to_message().map(|reply| reply.id.0 as i64),
        received_at: Utc::now(),
    };

    let outcome = process_message(&ctx, incoming).await;
    debug!(?outcome, chat_id = msg.chat.id.0, "ingress pipeline outcome");
    Ok(())
}
