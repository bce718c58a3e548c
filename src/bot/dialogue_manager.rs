//! Dialogue Manager module tying the session registry to the engine

use tracing::{debug, error};

use crate::engine::{ConversationEngine, TurnOutcome};
use crate::errors::EngineError;
use crate::localization::{t_args_lang, t_lang};
use crate::registry::SessionRegistry;

/// Run one intake turn for `user_id`.
///
/// Turns for the same user are serialized on the session lock; other users'
/// sessions are never blocked by this call.
pub async fn converse(
    engine: &ConversationEngine,
    registry: &SessionRegistry,
    user_id: i64,
    text: &str,
) -> Result<TurnOutcome, EngineError> {
    let handle = registry.handle(user_id);
    let mut session = handle.lock().await;
    debug!(user_id, state = ?session.state, "Session locked for turn");
    engine.handle_message(&mut session, text).await
}

/// Text to send back for a turn result, or `None` when there is nothing to say
pub fn reply_text(
    result: &Result<TurnOutcome, EngineError>,
    language_code: Option<&str>,
) -> Option<String> {
    match result {
        Ok(outcome) if !outcome.reply.trim().is_empty() => Some(outcome.reply.clone()),
        Ok(outcome) if outcome.completed => Some(t_args_lang(
            "intake-complete",
            &[("name", outcome.name.as_deref().unwrap_or_default())],
            language_code,
        )),
        Ok(_) => None,
        Err(e) if e.is_storage() => {
            error!(error = %e, "Lead store failure during intake turn");
            Some(t_lang("error-saving-details", language_code))
        }
        Err(e @ EngineError::Lookup(_)) => {
            error!(error = %e, "Lead store lookup failed during intake turn");
            Some(t_lang("error-assistant-unavailable", language_code))
        }
        Err(e) => {
            error!(error = %e, "Chat model failure during intake turn");
            Some(t_lang("error-assistant-unavailable", language_code))
        }
    }
}
