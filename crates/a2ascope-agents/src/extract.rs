//! Display text for A2A responses.
//!
//! A response may be a bare string, a JSON-RPC error, a task, a message,
//! a streaming status/artifact update, or some legacy shape. Each shape
//! has its own extractor; [`extract_content`] tries them in priority order
//! and [`extract_display_text`] falls back to pretty-printed JSON so there
//! is always something to show.

use serde_json::Value;

use crate::a2a::model::first_text_part;

type Extractor = fn(&Value) -> Option<String>;

const EXTRACTORS: [(&str, Extractor); 7] = [
    ("plain string", from_plain_string),
    ("rpc error", protocol_error),
    ("task", from_task),
    ("message", from_message),
    ("status update", from_status_update),
    ("artifact update", from_artifact_update),
    ("legacy result", from_legacy_result),
];

/// Content from the first extractor that recognises the payload.
pub fn extract_content(payload: &Value) -> Option<String> {
    EXTRACTORS.iter().find_map(|(_, extract)| extract(payload))
}

/// Like [`extract_content`] but never empty-handed: unrecognised payloads
/// are rendered as indented JSON.
pub fn extract_display_text(payload: &Value) -> String {
    extract_content(payload).unwrap_or_else(|| {
        serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
    })
}

/// The A2A object a payload carries: the payload itself when it has a
/// `kind`, else a `result` object with a `kind`.
pub fn protocol_body(payload: &Value) -> Option<&Value> {
    if payload.get("kind").is_some_and(Value::is_string) {
        return Some(payload);
    }
    payload
        .get("result")
        .filter(|result| result.get("kind").is_some_and(Value::is_string))
}

fn kind_of(body: &Value) -> Option<&str> {
    body.get("kind").and_then(Value::as_str)
}

/// `"Agent error <code>: <message>"` for a top-level `error` or a nested
/// `data.error`, degrading when either field is missing.
pub fn protocol_error(payload: &Value) -> Option<String> {
    let error = payload
        .get("error")
        .filter(|e| !e.is_null())
        .or_else(|| payload.get("data")?.get("error").filter(|e| !e.is_null()))?;

    if let Some(message) = error.as_str() {
        return Some(format!("Agent error: {message}"));
    }

    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty());

    Some(match (code, message) {
        (Some(code), Some(message)) => format!("Agent error {code}: {message}"),
        (Some(code), None) => format!("Agent error {code}"),
        (None, Some(message)) => format!("Agent error: {message}"),
        (None, None) => "Agent returned an error.".to_string(),
    })
}

fn from_plain_string(payload: &Value) -> Option<String> {
    payload.as_str().map(str::to_string)
}

fn from_task(payload: &Value) -> Option<String> {
    let task = protocol_body(payload).filter(|b| kind_of(b) == Some("task"))?;

    let mut sections = Vec::new();
    if let Some(text) = status_message_text(task).or_else(|| latest_agent_history_text(task)) {
        sections.push(text);
    }
    if let Some(block) = task
        .get("artifacts")
        .and_then(Value::as_array)
        .and_then(|artifacts| artifacts_block(artifacts))
    {
        sections.push(block);
    }

    if sections.is_empty() {
        return Some(state_fallback(task_state_str(task)));
    }
    Some(sections.join("\n\n"))
}

fn from_message(payload: &Value) -> Option<String> {
    let message = protocol_body(payload).filter(|b| kind_of(b) == Some("message"))?;
    message
        .get("parts")
        .and_then(first_text_part)
        .map(str::to_string)
}

fn from_status_update(payload: &Value) -> Option<String> {
    let update = protocol_body(payload).filter(|b| kind_of(b) == Some("status-update"))?;
    status_message_text(update)
}

fn from_artifact_update(payload: &Value) -> Option<String> {
    let update = protocol_body(payload).filter(|b| kind_of(b) == Some("artifact-update"))?;
    let artifact = update.get("artifact")?;
    artifacts_block(std::slice::from_ref(artifact))
}

fn from_legacy_result(payload: &Value) -> Option<String> {
    match payload.get("result")? {
        Value::String(text) => Some(text.clone()),
        Value::Object(result) => ["message", "content", "text"]
            .iter()
            .find_map(|key| result.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// `status.message` as a raw string or as a message with a text part.
pub fn status_message_text(body: &Value) -> Option<String> {
    let message = body.get("status")?.get("message")?;
    match message {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Object(_) => message
            .get("parts")
            .and_then(first_text_part)
            .map(str::to_string),
        _ => None,
    }
}

/// Most recent agent-authored history entry with a text part.
fn latest_agent_history_text(task: &Value) -> Option<String> {
    task.get("history")?
        .as_array()?
        .iter()
        .rev()
        .filter(|entry| entry.get("role").and_then(Value::as_str) == Some("agent"))
        .find_map(|entry| entry.get("parts").and_then(first_text_part))
        .map(str::to_string)
}

pub fn task_state_str(body: &Value) -> Option<&str> {
    body.get("status")?.get("state")?.as_str()
}

/// Fixed sentence describing a task state when there is nothing else to show.
pub fn state_fallback(state: Option<&str>) -> String {
    match state {
        Some("submitted") => "Task submitted. Waiting for the agent to start.".to_string(),
        Some("working") => "The agent is working on this task.".to_string(),
        Some("input-required") => "The agent needs more input to continue.".to_string(),
        Some("completed") => "Task completed.".to_string(),
        Some("failed") => "Task failed.".to_string(),
        Some("canceled") => "Task was canceled.".to_string(),
        other => format!("Task status: {}", other.unwrap_or("unknown")),
    }
}

/// Text artifacts as labelled, block-quoted code excerpts.
fn artifacts_block(artifacts: &[Value]) -> Option<String> {
    let rendered: Vec<String> = artifacts
        .iter()
        .enumerate()
        .filter_map(|(i, artifact)| {
            let text = artifact_text(artifact)?;
            let label = artifact
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("artifact-{}", i + 1));

            let mut block = format!("> **{label}**\n> ```\n");
            for line in text.lines() {
                block.push_str("> ");
                block.push_str(line);
                block.push('\n');
            }
            block.push_str("> ```");
            Some(block)
        })
        .collect();

    if rendered.is_empty() {
        return None;
    }
    let heading = if rendered.len() == 1 {
        "**Artifact:**"
    } else {
        "**Artifacts:**"
    };
    Some(format!("{heading}\n\n{}", rendered.join("\n\n")))
}

fn artifact_text(artifact: &Value) -> Option<String> {
    let texts: Vec<&str> = artifact
        .get("parts")?
        .as_array()?
        .iter()
        .filter(|part| part.get("kind").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
