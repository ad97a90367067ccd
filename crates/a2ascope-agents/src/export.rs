//! Conversation export and request reproduction.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use a2ascope_common::{AgentId, Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::a2a::model::AgentCard;
use crate::chat::{ChatMessage, RpcLogEntry};
use crate::store::AgentStore;

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            other => Err(Error::Validation(format!(
                "unknown export format '{other}' (use json or md)"
            ))),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetadata<'a> {
    agent_name: &'a str,
    agent_id: &'a AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_id: Option<&'a str>,
    exported_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ConversationExport<'a> {
    metadata: ExportMetadata<'a>,
    messages: &'a [ChatMessage],
}

pub fn export_json(
    card: &AgentCard,
    context_id: Option<&str>,
    messages: &[ChatMessage],
    exported_at: DateTime<Utc>,
) -> Result<String> {
    let export = ConversationExport {
        metadata: ExportMetadata {
            agent_name: &card.name,
            agent_id: &card.id,
            context_id,
            exported_at,
        },
        messages,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

pub fn export_markdown(
    card: &AgentCard,
    context_id: Option<&str>,
    messages: &[ChatMessage],
    exported_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Conversation with {}\n", card.name);
    let _ = writeln!(out, "- Agent ID: `{}`", card.id);
    if let Some(context_id) = context_id {
        let _ = writeln!(out, "- Context ID: `{context_id}`");
    }
    let _ = writeln!(out, "- Exported: {}\n", exported_at.to_rfc3339());

    for message in messages {
        let _ = writeln!(out, "---\n");
        let _ = writeln!(
            out,
            "### {} ({})\n",
            message.role.label(),
            message.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "{}\n", message.content);

        match (&message.task_id, &message.task_state) {
            (Some(task_id), Some(state)) => {
                let _ = writeln!(out, "> Task `{task_id}`: {state}\n");
            }
            (Some(task_id), None) => {
                let _ = writeln!(out, "> Task `{task_id}`\n");
            }
            _ => {}
        }
    }
    out
}

/// `<agent-slug>-<YYYYMMDD-HHMMSS>.<ext>`
pub fn export_filename(agent_name: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
    let lowered = agent_name.to_lowercase();
    let slug = NON_ALPHANUMERIC.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "agent" } else { slug };
    format!(
        "{slug}-{}.{}",
        at.format("%Y%m%d-%H%M%S"),
        format.extension()
    )
}

/// Write an agent's conversation into `dir` and return the file path.
pub fn export_conversation(
    store: &AgentStore,
    agent_id: &AgentId,
    format: ExportFormat,
    dir: &Path,
) -> Result<PathBuf> {
    let (card, context_id, messages) = store
        .read(agent_id, |s| (s.card.clone(), s.context_id.clone(), s.messages.clone()))
        .ok_or_else(|| Error::NotFound(format!("agent '{agent_id}' is not registered")))?;

    let now = Utc::now();
    let body = match format {
        ExportFormat::Json => export_json(&card, context_id.as_deref(), &messages, now)?,
        ExportFormat::Markdown => export_markdown(&card, context_id.as_deref(), &messages, now),
    };

    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_filename(&card.name, format, now));
    std::fs::write(&path, body)?;
    info!("exported {} messages to {}", messages.len(), path.display());
    Ok(path)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A `curl` command that replays a logged request.
pub fn to_curl(entry: &RpcLogEntry) -> String {
    let body = entry.request_payload.to_string();
    let mut lines = vec![format!("curl -X POST {}", shell_quote(&entry.endpoint_url))];
    for (name, value) in &entry.request_headers {
        lines.push(format!("  -H {}", shell_quote(&format!("{name}: {value}"))));
    }
    lines.push(format!("  --data {}", shell_quote(&body)));
    lines.join(" \\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::client::Headers;
    use crate::card::normalize_agent_card;
    use crate::chat::MessageStatus;
    use crate::a2a::model::TaskState;
    use chrono::TimeZone;
    use serde_json::json;

    fn card() -> AgentCard {
        normalize_agent_card(&json!({ "name": "Weather Bot!", "url": "https://w.example/rpc" }), None).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn filename_is_slugged_and_timestamped() {
        assert_eq!(
            export_filename("Weather Bot!", ExportFormat::Json, at()),
            "weather-bot-20260304-050607.json"
        );
        assert_eq!(
            export_filename("???", ExportFormat::Markdown, at()),
            "agent-20260304-050607.md"
        );
    }

    #[test]
    fn json_export_has_metadata_and_messages() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello", MessageStatus::Complete)];
        let text = export_json(&card(), Some("ctx"), &messages, at()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["metadata"]["agentName"], "Weather Bot!");
        assert_eq!(value["metadata"]["agentId"], "Weather Bot!");
        assert_eq!(value["metadata"]["contextId"], "ctx");
        assert_eq!(value["messages"].as_array().unwrap().len(), 2);
        assert_eq!(value["messages"][1]["role"], "assistant");

        let text = export_json(&card(), None, &[], at()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["metadata"].get("contextId").is_none());
    }

    #[test]
    fn markdown_export_quotes_task_state() {
        let mut reply = ChatMessage::assistant("Booked.", MessageStatus::Complete);
        reply.task_id = Some("t1".into());
        reply.task_state = Some(TaskState::Completed);
        let md = export_markdown(&card(), None, &[ChatMessage::user("book it"), reply], at());

        assert!(md.starts_with("# Conversation with Weather Bot!"));
        assert!(md.contains("### User ("));
        assert!(md.contains("### Assistant ("));
        assert!(md.contains("> Task `t1`: completed"));
        assert!(!md.contains("Context ID"));
    }

    #[test]
    fn curl_escapes_single_quotes() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".into(), "application/json".into());
        let entry = RpcLogEntry::started(
            "https://w.example/rpc",
            json!({ "text": "it's" }),
            headers,
        );

        let curl = to_curl(&entry);

        assert_eq!(
            curl,
            "curl -X POST 'https://w.example/rpc' \\\n  -H 'Content-Type: application/json' \\\n  --data '{\"text\":\"it'\\''s\"}'"
        );
    }

    #[test]
    fn export_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::default();
        let id = store.register(card(), Default::default());
        store.append_message(&id, ChatMessage::user("hi"));

        let path = export_conversation(&store, &id, ExportFormat::Markdown, dir.path()).unwrap();

        assert!(path.starts_with(dir.path()));
        assert!(std::fs::read_to_string(path).unwrap().contains("hi"));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
