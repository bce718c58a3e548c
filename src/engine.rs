//! # Conversation Engine Module
//!
//! Turns one inbound user message plus the session history into the next
//! assistant reply. The chat model extracts slot values through the
//! `update_lead` tool; extracted values are merged into the session without
//! overwriting anything already collected, and the lead is written to the
//! store once all four slots are filled.
//!
//! A turn either commits completely or not at all: when the chat model
//! fails, times out or never stops calling tools, the session is left
//! exactly as it was.

use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{BotConfig, DEFAULT_MAX_MODEL_CALLS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::db::{self, NewLead, DEFAULT_SALE_TEMPERATURE};
use crate::errors::EngineError;
use crate::llm::{ChatMessage, ChatModel, ToolCall, ToolDefinition};
use crate::session::{Session, SessionState, Slot, Slots, Speaker, Turn};

pub const UPDATE_LEAD_TOOL: &str = "update_lead";
pub const SCHEDULE_APPOINTMENT_TOOL: &str = "schedule_appointment";
pub const SALE_TEMPERATURE_TOOL: &str = "update_sale_temperature";

pub const DEFAULT_PERSONA: &str = "You are AURA, the virtual assistant of psychologist Clara, \
who specializes in behavioral neuroscience and child development. Clara offers several therapy \
packages and related services. Always reply in Spanish unless the user clearly writes in another \
language. Chat briefly to understand the user's needs before quoting detailed prices. Help \
schedule sessions, answer questions about Clara's practice and keep answers short and friendly. \
Collect the client's name, service of interest, preferred time and phone number.";

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Opening paragraph of the system instruction
    pub persona: String,
    /// Upper bound for a single chat-completion call
    pub request_timeout: Duration,
    /// Chat-completion calls allowed per user message, tool rounds included
    pub max_model_calls: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_model_calls: DEFAULT_MAX_MODEL_CALLS,
        }
    }
}

impl From<&BotConfig> for EngineConfig {
    fn from(config: &BotConfig) -> Self {
        Self {
            persona: config
                .persona
                .clone()
                .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            request_timeout: config.chat.request_timeout(),
            max_model_calls: config.chat.max_model_calls,
        }
    }
}

/// Result of one successful turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Assistant reply to send back; may be empty if the model said nothing
    pub reply: String,
    /// Slots newly filled by this turn, in collection order
    pub filled: Vec<Slot>,
    /// Whether this turn completed the intake and saved the lead
    pub completed: bool,
    /// Client name collected so far
    pub name: Option<String>,
}

/// Changes requested through tools, applied only if the turn succeeds
#[derive(Debug, Clone)]
struct PendingEffects {
    slots: Slots,
    sale_temperature: Option<u8>,
}

/// Slot-filling conversation engine
pub struct ConversationEngine {
    model: Arc<dyn ChatModel>,
    pool: SqlitePool,
    config: EngineConfig,
    tools: Vec<ToolDefinition>,
}

impl ConversationEngine {
    pub fn new(model: Arc<dyn ChatModel>, pool: SqlitePool, config: EngineConfig) -> Self {
        Self {
            model,
            pool,
            config,
            tools: lead_tools(),
        }
    }

    /// Process one user message for `session`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Lookup`], [`EngineError::Chat`], [`EngineError::Timeout`]
    ///   and [`EngineError::ToolRoundsExhausted`] leave the session untouched.
    /// - [`EngineError::Storage`] while saving a completed lead keeps the new
    ///   turn and slots but leaves the session in progress, so the next
    ///   message retries the save.
    pub async fn handle_message(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let user_id = session.user_id;
        debug!(user_id, history = session.turns.len(), "Handling intake turn");

        let mut messages = Vec::with_capacity(session.turns.len() + 2);
        messages.push(ChatMessage::system(self.system_instruction(session).await?));
        messages.extend(session.turns.iter().map(turn_message));
        messages.push(ChatMessage::user(text));

        let mut effects = PendingEffects {
            slots: session.slots.clone(),
            sale_temperature: session.sale_temperature,
        };
        let reply = self.converse(user_id, &mut messages, &mut effects).await?;

        session.turns.push(Turn {
            speaker: Speaker::User,
            text: text.to_string(),
        });
        session.turns.push(Turn {
            speaker: Speaker::Assistant,
            text: reply.clone(),
        });
        let filled = session.slots.merge(&effects.slots);
        if effects.sale_temperature.is_some() {
            session.sale_temperature = effects.sale_temperature;
        }
        session.last_activity = Utc::now();

        if !filled.is_empty() {
            info!(user_id, filled = ?filled, missing = ?session.slots.missing(), "Slots updated");
        }

        let completed = self.flush_if_complete(session).await?;
        Ok(TurnOutcome {
            reply,
            filled,
            completed,
            name: session.slots.name.clone(),
        })
    }

    /// Call the model until it answers without tool calls
    async fn converse(
        &self,
        user_id: i64,
        messages: &mut Vec<ChatMessage>,
        effects: &mut PendingEffects,
    ) -> Result<String, EngineError> {
        for call_index in 0..self.config.max_model_calls {
            let message = self.call_model(messages).await?;
            let calls = message.requested_tools().to_vec();
            if calls.is_empty() {
                return Ok(message.content.unwrap_or_default());
            }

            debug!(user_id, call_index, tools = calls.len(), "Model requested tools");
            messages.push(message);
            for call in &calls {
                let result = self.run_tool(user_id, call, effects).await?;
                messages.push(ChatMessage::tool_result(
                    call,
                    json!({ "result": result }).to_string(),
                ));
            }
        }

        warn!(user_id, max = self.config.max_model_calls, "Tool call budget exhausted");
        Err(EngineError::ToolRoundsExhausted(self.config.max_model_calls))
    }

    async fn call_model(&self, messages: &[ChatMessage]) -> Result<ChatMessage, EngineError> {
        let timeout = self.config.request_timeout;
        let message = tokio::time::timeout(timeout, self.model.complete(messages, &self.tools))
            .await
            .map_err(|_| {
                warn!(model = self.model.name(), timeout = ?timeout, "Chat completion timed out");
                EngineError::Timeout(timeout)
            })??;
        Ok(message)
    }

    async fn run_tool(
        &self,
        user_id: i64,
        call: &ToolCall,
        effects: &mut PendingEffects,
    ) -> Result<Value, EngineError> {
        let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(Value::Object(arguments)) => arguments,
            Ok(_) | Err(_) => {
                warn!(user_id, tool = %call.function.name, "Tool called with malformed arguments");
                return Ok(json!("invalid_arguments"));
            }
        };

        match call.function.name.as_str() {
            UPDATE_LEAD_TOOL => {
                let extracted = extract_slots(&arguments);
                let filled = effects.slots.merge(&extracted);
                debug!(user_id, filled = ?filled, "Lead update extracted");
                Ok(json!("ok"))
            }
            SCHEDULE_APPOINTMENT_TOOL => {
                let service_id = arguments.get("service_id").and_then(Value::as_i64);
                let scheduled_time = arguments
                    .get("scheduled_time")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|time| !time.is_empty());
                let (Some(service_id), Some(scheduled_time)) = (service_id, scheduled_time) else {
                    return Ok(json!("invalid_arguments"));
                };
                let booked =
                    db::schedule_appointment(&self.pool, user_id, service_id, scheduled_time)
                        .await?;
                Ok(json!(booked))
            }
            SALE_TEMPERATURE_TOOL => match arguments.get("temperature").and_then(Value::as_f64) {
                Some(temperature) => {
                    effects.sale_temperature = Some(temperature.round().clamp(0.0, 100.0) as u8);
                    Ok(json!("ok"))
                }
                None => Ok(json!("invalid_arguments")),
            },
            other => {
                warn!(user_id, tool = other, "Model called an unknown tool");
                Ok(json!("unknown_tool"))
            }
        }
    }

    /// Save the lead the first time every slot is filled
    async fn flush_if_complete(&self, session: &mut Session) -> Result<bool, EngineError> {
        if session.is_complete() || !session.slots.is_complete() {
            return Ok(false);
        }

        let slots = &session.slots;
        let lead = NewLead {
            telegram_id: session.user_id,
            name: slots.name.clone().unwrap_or_default(),
            service: slots.service.clone().unwrap_or_default(),
            preferred_time: slots.schedule.clone().unwrap_or_default(),
            phone: slots.phone.clone().unwrap_or_default(),
            sale_temperature: session.sale_temperature.unwrap_or(DEFAULT_SALE_TEMPERATURE),
            transcript: session.transcript(),
        };
        if let Err(e) = db::upsert_lead(&self.pool, &lead).await {
            warn!(user_id = session.user_id, error = %e, "Failed to save completed lead");
            return Err(e.into());
        }

        session.state = SessionState::Complete;
        info!(user_id = session.user_id, "Intake complete");
        Ok(true)
    }

    async fn system_instruction(&self, session: &Session) -> Result<String, EngineError> {
        let services = db::list_services(&self.pool)
            .await
            .map_err(EngineError::Lookup)?;
        let open_times = db::list_open_times(&self.pool)
            .await
            .map_err(EngineError::Lookup)?;
        let known_lead = db::get_lead_by_telegram_id(&self.pool, session.user_id)
            .await
            .map_err(EngineError::Lookup)?;

        let services = services
            .iter()
            .map(|s| format!("{}: {} (${:.2})", s.id, s.name, s.price))
            .collect::<Vec<_>>()
            .join(", ");
        let open_times = open_times
            .iter()
            .map(|ot| format!("{}:{}-{}", ot.day_of_week, ot.open_time, ot.close_time))
            .collect::<Vec<_>>()
            .join(", ");

        let mut instruction = format!(
            "{} Current datetime: {} UTC. Available services (id: name (price)): {}. \
             Opening hours (day:open-close, 1 = Monday): {}.",
            self.config.persona,
            Utc::now().format("%Y-%m-%d %H:%M"),
            services,
            open_times,
        );

        if let Some(lead) = known_lead {
            let known: Vec<String> = [
                ("name", lead.name),
                ("service", lead.service),
                ("preferred time", lead.preferred_time),
                ("phone", lead.phone),
            ]
            .into_iter()
            .filter_map(|(label, value)| value.map(|v| format!("{label}: {v}")))
            .collect();
            if !known.is_empty() {
                instruction.push_str(&format!(" Previously recorded lead data: {}.", known.join(", ")));
            }
        }

        let collected: Vec<String> = Slot::ALL
            .into_iter()
            .filter_map(|slot| session.slots.get(slot).map(|v| format!("{slot}: {v}")))
            .collect();
        if collected.is_empty() {
            instruction.push_str(" Nothing has been collected in this conversation yet.");
        } else {
            instruction.push_str(&format!(" Collected so far: {}.", collected.join(", ")));
        }

        match session.slots.next_missing() {
            Some(slot) => instruction.push_str(&format!(
                " Call {UPDATE_LEAD_TOOL} as soon as the user mentions any detail, then ask for the client's {slot}."
            )),
            None => instruction.push_str(
                " All details are collected; confirm them briefly and help with any other question.",
            ),
        }

        Ok(instruction)
    }
}

fn turn_message(turn: &Turn) -> ChatMessage {
    match turn.speaker {
        Speaker::User => ChatMessage::user(turn.text.clone()),
        Speaker::Assistant => ChatMessage::assistant(turn.text.clone()),
    }
}

/// Read slot values from `update_lead` arguments.
///
/// Strings and numbers are accepted as-is; anything else is ignored.
fn extract_slots(arguments: &Map<String, Value>) -> Slots {
    let text = |keys: &[&str]| {
        keys.iter().find_map(|key| match arguments.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    Slots {
        name: text(&["name"]),
        service: text(&["service"]),
        schedule: text(&["preferred_time", "schedule"]),
        phone: text(&["phone"]),
    }
}

/// Tools offered to the model on every call
pub fn lead_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            UPDATE_LEAD_TOOL,
            "Update lead information as soon as it is known",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "service": {"type": "string"},
                    "preferred_time": {"type": "string"},
                    "phone": {"type": "string"}
                }
            }),
        ),
        ToolDefinition::function(
            SCHEDULE_APPOINTMENT_TOOL,
            "Schedule a session for the lead",
            json!({
                "type": "object",
                "properties": {
                    "service_id": {"type": "integer"},
                    "scheduled_time": {"type": "string"}
                },
                "required": ["service_id", "scheduled_time"]
            }),
        ),
        ToolDefinition::function(
            SALE_TEMPERATURE_TOOL,
            "Update the lead's sale temperature (0-100)",
            json!({
                "type": "object",
                "properties": {"temperature": {"type": "integer"}},
                "required": ["temperature"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_slots_accepts_strings_and_numbers() {
        let arguments = json!({
            "name": "Sam",
            "service": "   ",
            "preferred_time": "Tuesdays 5pm",
            "phone": 5550100,
            "unrelated": true
        });
        let slots = extract_slots(arguments.as_object().unwrap());

        assert_eq!(slots.name.as_deref(), Some("Sam"));
        assert!(slots.service.is_none());
        assert_eq!(slots.schedule.as_deref(), Some("Tuesdays 5pm"));
        assert_eq!(slots.phone.as_deref(), Some("5550100"));
    }

    #[test]
    fn test_extract_slots_schedule_alias() {
        let arguments = json!({"schedule": "mornings", "name": null});
        let slots = extract_slots(arguments.as_object().unwrap());
        assert_eq!(slots.schedule.as_deref(), Some("mornings"));
        assert!(slots.name.is_none());
    }

    #[test]
    fn test_lead_tools_are_named() {
        let names: Vec<&str> = lead_tools().iter().map(|t| t.function.name).collect();
        assert_eq!(
            names,
            vec![UPDATE_LEAD_TOOL, SCHEDULE_APPOINTMENT_TOOL, SALE_TEMPERATURE_TOOL]
        );
    }
}
