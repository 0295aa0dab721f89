//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event loop
//! until the process exits. Reconnects automatically on transport errors.

use std::sync::Arc;

use buhbot_ingress::IngressContext;
use buhbot_scheduler::{QueueName, SchedulerEngine};
use teloxide::prelude::*;
use tracing::info;

use crate::handler::handle_message;
use crate::proactive::AlertDispatchHandler;

/// Telegram channel adapter. Wraps a teloxide `Bot` and drives the Dispatcher
/// event loop until the process exits. Long polling — no public URL required.
pub struct TelegramAdapter {
    ctx: Arc<IngressContext>,
    bot_token: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: String, ctx: Arc<IngressContext>) -> Self {
        Self { ctx, bot_token }
    }

    /// Registers the alert-dispatch handler on `scheduler` using this
    /// adapter's bot. Must run before the scheduler's own `run()` loop starts.
    pub fn register_alert_dispatch(&self, scheduler: &SchedulerEngine, concurrency: usize) {
        let bot = Bot::new(&self.bot_token);
        scheduler.register_handler(QueueName::AlertDispatch, Arc::new(AlertDispatchHandler::new(bot)), concurrency, None);
    }

    /// Connect to Telegram and drive the long-polling loop.
    ///
    /// Never returns — runs for the lifetime of the process.
    pub async fn run(self) {
        let bot = Bot::new(&self.bot_token);
        info!("Telegram: starting long-polling dispatcher");

        let ctx = Arc::clone(&self.ctx);
        let handler = Update::filter_message().endpoint(handle_message);

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![ctx])
            .default_handler(|_upd| async {})
            .build()
            .dispatch()
            .await;
    }
}
