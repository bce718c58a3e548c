//! OpenAI-compatible chat-completion client.
//!
//! [`ChatModel`] is the seam the conversation engine talks to; the
//! [`OpenAiChatModel`] implementation works with OpenAI's API and any
//! endpoint that speaks the same `/chat/completions` protocol with tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

use crate::config::ChatConfig;
use crate::errors::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them
    pub arguments: String,
}

/// One message of a chat-completion exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant message requesting tool calls
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    /// Result of a tool call, sent back to the model
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call.id.clone()),
            name: Some(call.function.name.clone()),
        }
    }

    /// Tool calls requested by this message, empty when there are none
    pub fn requested_tools(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &'static str, description: &'static str, parameters: Value) -> Self {
        Self {
            kind: "function",
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }
}

/// Chat-completion backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Send the conversation and return the model's next message
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "<[ToolDefinition]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

/// OpenAI-compatible chat-completion client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, ChatError> {
        let url = self.endpoint();
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };
        let start = Instant::now();
        debug!(url = %url, model = %self.model, messages = messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        debug!(
            model = parsed.model.as_deref().unwrap_or("unknown"),
            tokens = ?parsed.usage.and_then(|u| u.total_tokens),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat completion received"
        );

        parse_choice(parsed.choices)
    }
}

fn parse_choice(choices: Vec<ChatChoice>) -> Result<ChatMessage, ChatError> {
    let mut message = choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .ok_or_else(|| ChatError::MalformedResponse("no choices in response".to_string()))?;

    // Some compatible servers send `"tool_calls": []`, which the API rejects
    // when echoed back in the history.
    if message.tool_calls.as_ref().is_some_and(Vec::is_empty) {
        message.tool_calls = None;
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_message_serialization_skips_tool_fields() {
        let value = serde_json::to_value(ChatMessage::user("Hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "Hi"}));
    }

    #[test]
    fn test_tool_result_serialization() {
        let call = ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "update_lead".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let value = serde_json::to_value(ChatMessage::tool_result(&call, r#"{"result":"ok"}"#)).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "tool",
                "content": "{\"result\":\"ok\"}",
                "tool_call_id": "call_1",
                "name": "update_lead"
            })
        );
    }

    #[test]
    fn test_request_serialization() {
        let tools = vec![ToolDefinition::function(
            "update_lead",
            "Update lead information",
            json!({"type": "object", "properties": {}}),
        )];
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("Hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4.1",
            messages: &messages,
            tools: &tools,
            tool_choice: Some("auto"),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gpt-4.1");
        assert_eq!(value["tool_choice"], "auto");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "update_lead");
        assert_eq!(value["messages"][1]["content"], "Hi");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let body = json!({
            "model": "gpt-4.1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "update_lead", "arguments": "{\"name\":\"Sam\"}"}
                    }]
                }
            }]
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let message = parse_choice(parsed.choices).unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert!(message.content.is_none());
        assert_eq!(message.requested_tools().len(), 1);
        assert_eq!(message.requested_tools()[0].function.name, "update_lead");
    }

    #[test]
    fn test_parse_response_normalizes_empty_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello", "tool_calls": []}
            }]
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let message = parse_choice(parsed.choices).unwrap();
        assert!(message.tool_calls.is_none());
        assert_eq!(message.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let parsed: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = parse_choice(parsed.choices).unwrap_err();
        assert!(matches!(err, ChatError::MalformedResponse(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let model = OpenAiChatModel::new(&ChatConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..ChatConfig::default()
        });
        assert_eq!(model.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(model.name(), "openai");
    }
}
