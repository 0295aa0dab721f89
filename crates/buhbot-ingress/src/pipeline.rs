use std::sync::Arc;

use buhbot_classifier::{ClassifierClient, ClassifyContext};
use buhbot_core::types::{ChatId, ChatMessage, Classification, Request, RequestStatus, TelegramUserId};
use buhbot_scheduler::SchedulerEngine;
use buhbot_settings::ConfigResolver;
use buhbot_store::Db;
use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crate::error::Result;

/// Everything the pipeline needs for one inbound text message, already
/// translated out of the platform adapter's own message type.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: i64,
    pub from_user_id: TelegramUserId,
    pub from_username: Option<String>,
    pub text: String,
    pub reply_to_message_id: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// Shared handles the pipeline threads through; built once at boot and
/// cloned cheaply (everything behind it is already an `Arc`).
#[derive(Clone)]
pub struct IngressContext {
    pub db: Db,
    pub resolver: Arc<ConfigResolver>,
    pub classifier: Arc<ClassifierClient>,
    pub scheduler: Arc<SchedulerEngine>,
}

/// What the pipeline did with a message — mainly useful for tests and
/// metrics, the platform adapter itself only cares that nothing panicked.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    ChatNotMonitored,
    ResponderAnswered,
    ResponderIgnoredAlreadyAnswered,
    ResponderNoTarget,
    RequestCreated(RequestStatus),
    ClassifiedNoRequest(Classification),
}

/// §4.10 entry point. Never propagates an error to the caller — a platform
/// adapter that saw one would retry the delivery and double-process it — so
/// every failure is logged here and the call always returns.
#[instrument(skip(ctx, message), fields(chat_id = message.chat_id.0, message_id = message.message_id))]
pub async fn process_message(ctx: &IngressContext, message: IncomingMessage) -> Outcome {
    match process_message_inner(ctx, &message).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(%err, "ingress pipeline failed, dropping message");
            Outcome::ChatNotMonitored
        }
    }
}

async fn process_message_inner(ctx: &IngressContext, message: &IncomingMessage) -> Result<Outcome> {
    // Step 1: gate on chat existence and monitoring flags.
    let Some(chat) = buhbot_store::chats::find_chat(&ctx.db, message.chat_id)? else {
        return Ok(Outcome::ChatNotMonitored);
    };
    if chat.deleted_at.is_some() || !chat.monitoring_enabled {
        return Ok(Outcome::ChatNotMonitored);
    }

    // Step 2: persist the raw message for observability. Never aborts the pipeline.
    let raw = ChatMessage {
        chat_id: message.chat_id,
        message_id: message.message_id,
        from_user_id: message.from_user_id,
        from_username: message.from_username.clone(),
        text: message.text.clone(),
        received_at: message.received_at,
        resolved_request_id: None,
    };
    if let Err(err) = buhbot_store::messages::insert_message(&ctx.db, &raw) {
        warn!(%err, "failed to persist raw chat message, continuing anyway");
    }

    // Step 3: responder branch.
    let identify = buhbot_requests::is_accountant_for_chat(&ctx.db, message.chat_id, message.from_username.as_deref(), message.from_user_id);
    if identify.is_accountant {
        return responder_branch(ctx, &chat, message, identify.accountant_id).await;
    }

    // Step 4: client branch.
    client_branch(ctx, &chat, message).await
}

async fn responder_branch(
    ctx: &IngressContext,
    chat: &buhbot_core::types::Chat,
    message: &IncomingMessage,
    accountant_id: Option<buhbot_core::types::AccountantUserId>,
) -> Result<Outcome> {
    let target = buhbot_requests::match_response_target(&ctx.db, message.chat_id, message.reply_to_message_id)?;
    let request = match target {
        buhbot_requests::ResponseTarget::Found(request) => request,
        buhbot_requests::ResponseTarget::AlreadyAnswered => return Ok(Outcome::ResponderIgnoredAlreadyAnswered),
        buhbot_requests::ResponseTarget::None => return Ok(Outcome::ResponderNoTarget),
    };

    let Some(accountant_id) = accountant_id else {
        warn!(request_id = %request.id, "accountant matched by username alone has no stable id, skipping claim");
        return Ok(Outcome::ResponderNoTarget);
    };

    let threshold_minutes = ctx.resolver.sla_threshold_minutes(chat);
    let outcome = buhbot_sla::stop_sla_timer(
        &ctx.db,
        &ctx.scheduler,
        request.id,
        chat,
        request.received_at,
        threshold_minutes,
        message.received_at,
        message.message_id,
        accountant_id,
    )?;

    if let Err(err) = buhbot_store::messages::annotate_resolved_request(&ctx.db, message.chat_id, message.message_id, request.id) {
        warn!(%err, "failed to annotate message with resolved request id");
    }

    info!(request_id = %request.id, working_minutes = outcome.working_minutes, breached = outcome.breached, "responder answered request");
    Ok(Outcome::ResponderAnswered)
}

async fn client_branch(ctx: &IngressContext, chat: &buhbot_core::types::Chat, message: &IncomingMessage) -> Result<Outcome> {
    let classify_ctx = ClassifyContext {
        chat_id: message.chat_id.0,
        client_tier: chat.client_tier.map(|t| t.to_string()),
        recent_history: Vec::new(),
    };
    let response = ctx.classifier.classify(&message.text, &classify_ctx).await?;

    match response.classification {
        Classification::Request => {
            let request = build_request(message, &response, RequestStatus::Pending);
            buhbot_store::requests::create_request(&ctx.db, &request)?;
            let threshold_minutes = ctx.resolver.sla_threshold_minutes(chat);
            buhbot_sla::start_sla_timer(&ctx.db, &ctx.scheduler, &ctx.resolver, request.id, chat, request.received_at, threshold_minutes)?;
            Ok(Outcome::RequestCreated(RequestStatus::Pending))
        }
        Classification::Clarification => {
            let request = build_request(message, &response, RequestStatus::Answered);
            buhbot_store::requests::create_request(&ctx.db, &request)?;
            Ok(Outcome::RequestCreated(RequestStatus::Answered))
        }
        Classification::Spam | Classification::Gratitude => {
            info!(classification = %response.classification, confidence = response.confidence, "message classified, no request created");
            Ok(Outcome::ClassifiedNoRequest(response.classification))
        }
    }
}

fn build_request(message: &IncomingMessage, response: &buhbot_classifier::ClassifierResponse, status: RequestStatus) -> Request {
    Request {
        id: buhbot_core::types::RequestId::new(),
        chat_id: message.chat_id,
        message_id: message.message_id,
        message_text: message.text.clone(),
        client_username: message.from_username.clone(),
        classification: response.classification,
        classification_score: response.confidence,
        status,
        received_at: message.received_at,
        response_at: None,
        response_message_id: None,
        responded_by: None,
        response_time_minutes: None,
        sla_breached: false,
        assigned_to: None,
        thread_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buhbot_classifier::ClassifierClient;
    use buhbot_core::types::{Chat, ChatKind, RequestStatus};
    use buhbot_scheduler::SchedulerEngine;
    use std::sync::Mutex;
    use std::time::Duration;

    fn bare_chat(id: i64) -> Chat {
        Chat {
            id: ChatId(id),
            title: None,
            kind: ChatKind::Group,
            monitoring_enabled: true,
            sla_enabled: true,
            notify_in_chat_on_breach: false,
            is_24x7_mode: true,
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

    fn test_ctx() -> IngressContext {
        let db = Arc::new(Mutex::new(buhbot_store::db::open_test_db()));
        IngressContext {
            resolver: Arc::new(ConfigResolver::new(db.clone())),
            db,
            classifier: Arc::new(ClassifierClient::new("key".into(), "http://localhost:1".into(), "test".into(), Duration::from_secs(1))),
            scheduler: Arc::new(SchedulerEngine::new(buhbot_scheduler::db::open_test_db()).unwrap()),
        }
    }

    fn incoming(chat_id: i64, message_id: i64, from: i64) -> IncomingMessage {
        IncomingMessage {
            chat_id: ChatId(chat_id),
            message_id,
            from_user_id: TelegramUserId(from),
            from_username: Some("client".to_string()),
            text: "help please".to_string(),
            reply_to_message_id: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unmonitored_chat_is_ignored() {
        let ctx = test_ctx();
        let outcome = process_message(&ctx, incoming(1, 1, 10)).await;
        assert_eq!(outcome, Outcome::ChatNotMonitored);
    }

    #[tokio::test]
    async fn accountant_reply_claims_the_matching_request() {
        let ctx = test_ctx();
        let mut chat = bare_chat(5);
        chat.accountant_telegram_ids = vec![TelegramUserId(777)];
        chat.assigned_accountant_id = Some(buhbot_core::types::AccountantUserId(uuid::Uuid::now_v7()));
        buhbot_store::chats::upsert_chat(&ctx.db, &chat).unwrap();

        let request = build_request(
            &incoming(5, 1, 10),
            &buhbot_classifier::ClassifierResponse { classification: Classification::Request, confidence: 0.9, model: "m".into(), reasoning: None },
            RequestStatus::Pending,
        );
        buhbot_store::requests::create_request(&ctx.db, &request).unwrap();

        let mut reply = incoming(5, 2, 777);
        reply.from_username = None;
        reply.reply_to_message_id = Some(1);

        let outcome = process_message(&ctx, reply).await;
        assert_eq!(outcome, Outcome::ResponderAnswered);

        let stored = buhbot_store::requests::find_request(&ctx.db, request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Answered);
    }
}
