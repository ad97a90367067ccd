use std::fmt;
use std::str::FromStr;

use a2ascope_common::{AgentId, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Canonical agent card, produced by [`crate::card::normalize_agent_card`].
/// `raw` keeps the payload exactly as the agent published it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub id: AgentId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<AgentProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_input_modes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_output_modes: Option<Vec<String>>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    pub endpoints: Vec<AgentEndpoint>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    pub raw: Value,
}

impl AgentCard {
    pub fn endpoint(&self, id: &str) -> Option<&AgentEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn supports_streaming(&self) -> bool {
        self.capabilities.streaming
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProvider {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default)]
    pub state_transition_history: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_modes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modes: Option<Vec<String>>,
}

impl AgentSkill {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            description: None,
            examples: None,
            tags: None,
            input_modes: None,
            output_modes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub id: String,
    pub name: String,
    pub url: String,
    pub protocol: String,
}

/// Task lifecycle state as reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
    Unknown(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::AuthRequired => "auth-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Rejected => "rejected",
            TaskState::Unknown(s) => s,
        }
    }

    /// No further transitions follow a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }
}

impl From<&str> for TaskState {
    fn from(s: &str) -> Self {
        match s {
            "submitted" => TaskState::Submitted,
            "working" => TaskState::Working,
            "input-required" => TaskState::InputRequired,
            "auth-required" => TaskState::AuthRequired,
            "completed" => TaskState::Completed,
            "failed" => TaskState::Failed,
            "canceled" | "cancelled" => TaskState::Canceled,
            "rejected" => TaskState::Rejected,
            other => TaskState::Unknown(other.to_string()),
        }
    }
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        TaskState::from(s.as_str())
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-RPC methods the dashboard is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    #[serde(rename = "message/send")]
    MessageSend,
    #[serde(rename = "message/stream")]
    MessageStream,
    #[serde(rename = "tasks/get")]
    TasksGet,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 3] = [
        RpcMethod::MessageSend,
        RpcMethod::MessageStream,
        RpcMethod::TasksGet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::MessageSend => "message/send",
            RpcMethod::MessageStream => "message/stream",
            RpcMethod::TasksGet => "tasks/get",
        }
    }
}

impl FromStr for RpcMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RpcMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unsupported method '{s}'; expected one of message/send, message/stream, tasks/get"
                ))
            })
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    /// Envelope with a fresh random request id.
    pub fn new(method: RpcMethod, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            method: method.as_str().to_string(),
            params,
        }
    }

    /// `message/send` / `message/stream` params for a single user text.
    /// `task_id` continues a task that is waiting for input.
    pub fn message_params(text: &str, context_id: Option<&str>, task_id: Option<&str>) -> Value {
        let mut message = json!({
            "kind": "message",
            "messageId": uuid::Uuid::new_v4().to_string(),
            "role": "user",
            "parts": [{ "kind": "text", "text": text }],
        });
        if let Some(context_id) = context_id {
            message["contextId"] = json!(context_id);
        }
        if let Some(task_id) = task_id {
            message["taskId"] = json!(task_id);
        }

        let mut params = json!({ "message": message });
        if let Some(task_id) = task_id {
            params["id"] = json!(task_id);
        }
        params
    }

    pub fn task_params(task_id: &str, history_length: Option<u32>) -> Value {
        let mut params = json!({ "id": task_id });
        if let Some(history_length) = history_length {
            params["historyLength"] = json!(history_length);
        }
        params
    }
}

/// Text of the first `kind: "text"` entry in a list of message parts.
pub fn first_text_part(parts: &Value) -> Option<&str> {
    parts
        .as_array()?
        .iter()
        .find(|part| part.get("kind").and_then(Value::as_str) == Some("text"))
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
}
