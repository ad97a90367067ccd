use a2ascope_common::{LogEntryId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::a2a::client::Headers;
use crate::a2a::model::TaskState;
use crate::extract::{status_message_text, task_state_str};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Complete,
    Error,
}

/// One entry of the conversation shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_state: Option<TaskState>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text.into(), MessageStatus::Complete)
    }

    /// Empty assistant message shown while a stream is live.
    pub fn streaming_placeholder() -> Self {
        Self::new(ChatRole::Assistant, String::new(), MessageStatus::Streaming)
    }

    pub fn assistant(content: impl Into<String>, status: MessageStatus) -> Self {
        Self::new(ChatRole::Assistant, content.into(), status)
    }

    fn new(role: ChatRole, content: String, status: MessageStatus) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            content,
            timestamp: Utc::now(),
            status,
            error: None,
            task_id: None,
            task_state: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

/// Request/response record for the debug inspector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLogEntry {
    pub id: LogEntryId,
    pub endpoint_url: String,
    pub request_payload: Value,
    pub request_headers: Headers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LogStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl RpcLogEntry {
    pub fn started(endpoint_url: &str, request_payload: Value, request_headers: Headers) -> Self {
        Self {
            id: LogEntryId::generate(),
            endpoint_url: endpoint_url.to_string(),
            request_payload,
            request_headers,
            response_payload: None,
            status: None,
            http_status: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Fill the completion fields. Later calls on a completed entry are ignored.
    pub fn complete(&mut self, completion: LogCompletion) -> bool {
        if self.is_completed() {
            return false;
        }
        self.response_payload = Some(completion.response_payload);
        self.status = Some(completion.status);
        self.http_status = completion.http_status;
        self.completed_at = Some(completion.completed_at);
        self.duration_ms = Some(completion.duration_ms);
        true
    }
}

/// Outcome of an exchange, applied once to its log entry.
#[derive(Debug, Clone)]
pub struct LogCompletion {
    pub response_payload: Value,
    pub status: LogStatus,
    pub http_status: Option<u16>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A task seen in this agent's traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTask {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub state: TaskState,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One observation of a task, from a frame, a reply, or an explicit fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskObservation {
    pub task_id: String,
    pub context_id: Option<String>,
    pub state: TaskState,
    pub message: Option<String>,
}

impl TaskObservation {
    /// Task id and state carried by a task or status-update body.
    pub fn from_body(body: &Value) -> Option<Self> {
        let task_id = match body.get("kind").and_then(Value::as_str)? {
            "task" => body.get("id"),
            _ => body.get("taskId"),
        }
        .and_then(Value::as_str)?;
        let state = task_state_str(body)?;

        Some(Self {
            task_id: task_id.to_string(),
            context_id: body
                .get("contextId")
                .and_then(Value::as_str)
                .map(str::to_string),
            state: TaskState::from(state),
            message: status_message_text(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_entry_completes_once() {
        let mut entry = RpcLogEntry::started("https://a", json!({}), Headers::new());
        let first = LogCompletion {
            response_payload: json!({ "result": 1 }),
            status: LogStatus::Success,
            http_status: Some(200),
            completed_at: Utc::now(),
            duration_ms: 12,
        };
        assert!(entry.complete(first.clone()));

        let second = LogCompletion {
            status: LogStatus::Error,
            duration_ms: 99,
            ..first
        };
        assert!(!entry.complete(second));
        assert_eq!(entry.status, Some(LogStatus::Success));
        assert_eq!(entry.duration_ms, Some(12));
    }

    #[test]
    fn chat_message_serializes_camel_case() {
        let mut msg = ChatMessage::assistant("hi", MessageStatus::Complete);
        msg.task_id = Some("t1".into());
        msg.task_state = Some(TaskState::Completed);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["status"], "complete");
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["taskState"], "completed");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn observation_from_task_and_status_update() {
        let task = json!({
            "kind": "task",
            "id": "t1",
            "contextId": "c1",
            "status": { "state": "working", "message": "crunching" }
        });
        let obs = TaskObservation::from_body(&task).unwrap();
        assert_eq!(obs.task_id, "t1");
        assert_eq!(obs.context_id.as_deref(), Some("c1"));
        assert_eq!(obs.state, TaskState::Working);
        assert_eq!(obs.message.as_deref(), Some("crunching"));

        let update = json!({
            "kind": "status-update",
            "taskId": "t2",
            "status": { "state": "input-required" }
        });
        let obs = TaskObservation::from_body(&update).unwrap();
        assert_eq!(obs.task_id, "t2");
        assert_eq!(obs.state, TaskState::InputRequired);
        assert_eq!(obs.message, None);

        let message = json!({ "kind": "message", "parts": [] });
        assert!(TaskObservation::from_body(&message).is_none());
    }
}
