//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use crate::engine::ConversationEngine;
use crate::localization::t_lang;
use crate::registry::SessionRegistry;

use super::dialogue_manager::{converse, reply_text};

fn language_code(msg: &Message) -> Option<&str> {
    msg.from
        .as_ref()
        .and_then(|user| user.language_code.as_deref())
}

async fn handle_text_message(
    bot: &Bot,
    msg: &Message,
    text: &str,
    engine: &ConversationEngine,
    registry: &SessionRegistry,
) -> Result<()> {
    let user_id = msg.chat.id.0;
    let language_code = language_code(msg);
    debug!(user_id, message_length = text.len(), "Received text message from user");

    let result = converse(engine, registry, user_id, text).await;

    if matches!(&result, Ok(outcome) if outcome.completed) {
        info!(user_id, "Lead captured");
    }

    match reply_text(&result, language_code) {
        Some(reply) => {
            bot.send_message(msg.chat.id, reply).await?;
        }
        None => warn!(user_id, "Model produced an empty reply; nothing sent"),
    }
    Ok(())
}

async fn handle_unsupported_message(bot: &Bot, msg: &Message) -> Result<()> {
    debug!(user_id = %msg.chat.id, "Received unsupported message type from user");

    bot.send_message(msg.chat.id, t_lang("unsupported-message", language_code(msg)))
        .await?;
    Ok(())
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    engine: Arc<ConversationEngine>,
    registry: Arc<SessionRegistry>,
) -> Result<()> {
    match msg.text() {
        Some(text) => handle_text_message(&bot, &msg, text, &engine, &registry).await?,
        None => handle_unsupported_message(&bot, &msg).await?,
    }

    Ok(())
}
