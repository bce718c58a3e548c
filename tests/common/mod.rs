//! Shared fixtures for integration tests: in-memory database and fake chat models.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lead_intake::db;
use lead_intake::engine::{ConversationEngine, EngineConfig};
use lead_intake::errors::ChatError;
use lead_intake::llm::{ChatMessage, ChatModel, FunctionCall, Role, ToolCall, ToolDefinition};

pub async fn setup_test_db() -> Result<SqlitePool> {
    let pool = db::connect("sqlite::memory:", 1).await?;
    db::init_database_schema(&pool).await?;
    db::seed_default_catalog(&pool).await?;
    Ok(pool)
}

pub async fn count_leads(pool: &SqlitePool, telegram_id: i64) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM leads WHERE telegram_id = ?1")
        .bind(telegram_id)
        .fetch_one(pool)
        .await?)
}

pub fn engine_with(model: Arc<dyn ChatModel>, pool: SqlitePool) -> ConversationEngine {
    ConversationEngine::new(model, pool, EngineConfig::default())
}

/// Assistant message requesting one tool call
pub fn tool_call(name: &str, arguments: Value) -> ChatMessage {
    tool_calls(&[(name, arguments.to_string())])
}

/// Assistant message requesting several tool calls with raw argument strings
pub fn tool_calls(calls: &[(&str, String)]) -> ChatMessage {
    ChatMessage::assistant_tool_calls(
        calls
            .iter()
            .enumerate()
            .map(|(i, (name, arguments))| ToolCall {
                id: format!("call_{i}"),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.clone(),
                },
            })
            .collect(),
    )
}

/// Tool result messages found in a request, in order
pub fn tool_results(request: &[ChatMessage]) -> Vec<String> {
    request
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.content.clone())
        .collect()
}

/// Replays a fixed script of responses and records every request
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ChatMessage, ChatError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ChatMessage>) -> Arc<Self> {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<ChatMessage, ChatError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::MalformedResponse("script exhausted".to_string())))
    }
}

/// Never answers within any reasonable timeout
pub struct SlowModel {
    pub delay: Duration,
}

#[async_trait]
impl ChatModel for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        tokio::time::sleep(self.delay).await;
        Ok(ChatMessage::assistant("too late"))
    }
}

type Responder = dyn Fn(&[ChatMessage]) -> ChatMessage + Send + Sync;

/// Answers based on the conversation it receives
pub struct FnModel {
    responder: Box<Responder>,
}

impl FnModel {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[ChatMessage]) -> ChatMessage + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
        })
    }
}

#[async_trait]
impl ChatModel for FnModel {
    fn name(&self) -> &str {
        "fn"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        // Yield so concurrent turns genuinely interleave
        tokio::task::yield_now().await;
        Ok((self.responder)(messages))
    }
}
