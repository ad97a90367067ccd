//! Agent card normalization.
//!
//! Agents publish cards in several shapes (current A2A cards with a root
//! `url`, older drafts with `endpoints` lists or maps, single `endpoint`
//! objects). [`normalize_agent_card`] folds all of them into one
//! [`AgentCard`] and reports every structural problem at once.

use a2ascope_common::{AgentId, Error, Result};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::a2a::model::{AgentCapabilities, AgentCard, AgentEndpoint, AgentProvider, AgentSkill};

const KEYED_TRANSPORTS: [&str; 3] = ["jsonrpc", "rpc", "http"];
const DEFAULT_PROTOCOL: &str = "jsonrpc";

/// An endpoint as found in the payload, before URL validation.
struct Candidate {
    label: String,
    id: Option<String>,
    name: Option<String>,
    url: Option<String>,
    protocol: String,
}

/// Normalize a descriptor payload. On failure the error is
/// [`Error::InvalidCard`] carrying every problem found.
pub fn normalize_agent_card(payload: &Value, source_url: Option<&str>) -> Result<AgentCard> {
    let Some(obj) = payload.as_object() else {
        return Err(Error::InvalidCard(vec![
            "agent card must be a JSON object".to_string(),
        ]));
    };

    let mut errors = Vec::new();

    let name = str_field(obj, "name");
    if name.is_none() {
        errors.push("name is required".to_string());
    }

    let (candidates, from_root_url) = endpoint_candidates(obj);
    let mut endpoints = Vec::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        match validate_endpoint(candidate, index) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => errors.push(e),
        }
    }
    if from_root_url && !endpoints.is_empty() {
        let extra = additional_interfaces(obj, &endpoints);
        endpoints.extend(extra);
    }
    if endpoints.is_empty() {
        errors.push("at least one endpoint with a valid absolute URL is required".to_string());
    }

    let Some(name) = name else {
        return Err(Error::InvalidCard(errors));
    };
    if !errors.is_empty() {
        return Err(Error::InvalidCard(errors));
    }

    let id = str_field(obj, "id")
        .or_else(|| str_field(obj, "agentId"))
        .or_else(|| source_url.filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| name.clone());

    let url = source_url
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| str_field(obj, "url"))
        .unwrap_or_else(|| endpoints[0].url.clone());

    Ok(AgentCard {
        id: AgentId::new(id),
        name,
        description: str_field(obj, "description"),
        version: str_field(obj, "version"),
        protocol_version: str_field(obj, "protocolVersion"),
        url,
        provider: obj.get("provider").and_then(parse_provider),
        default_input_modes: string_list(obj.get("defaultInputModes")),
        default_output_modes: string_list(obj.get("defaultOutputModes")),
        skills: parse_skills(obj.get("skills")),
        endpoints,
        capabilities: parse_capabilities(obj.get("capabilities")),
        raw: payload.clone(),
    })
}

/// Normalize a pasted descriptor.
pub fn parse_card_text(text: &str, source_url: Option<&str>) -> Result<AgentCard> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|e| Error::InvalidCard(vec![format!("agent card is not valid JSON: {e}")]))?;
    normalize_agent_card(&payload, source_url)
}

/// Precedence: `endpoints` array, `endpoints` keyed by transport,
/// singular `endpoint`, root `url`. The first source that yields any
/// candidate wins. The flag is set when the root `url` was used.
fn endpoint_candidates(obj: &Map<String, Value>) -> (Vec<Candidate>, bool) {
    match obj.get("endpoints") {
        Some(Value::Array(items)) if !items.is_empty() => {
            let candidates = items
                .iter()
                .enumerate()
                .map(|(i, item)| candidate_from(item, format!("endpoints[{i}]"), DEFAULT_PROTOCOL))
                .collect();
            return (candidates, false);
        }
        Some(Value::Object(by_transport)) => {
            let candidates: Vec<Candidate> = KEYED_TRANSPORTS
                .iter()
                .filter_map(|key| Some((key, by_transport.get(*key)?.as_array()?)))
                .flat_map(|(key, items)| {
                    items.iter().enumerate().map(move |(i, item)| {
                        candidate_from(item, format!("endpoints.{key}[{i}]"), key)
                    })
                })
                .collect();
            if !candidates.is_empty() {
                return (candidates, false);
            }
        }
        _ => {}
    }

    if let Some(endpoint @ Value::Object(_)) = obj.get("endpoint") {
        return (
            vec![candidate_from(endpoint, "endpoint".to_string(), DEFAULT_PROTOCOL)],
            false,
        );
    }

    match str_field(obj, "url") {
        Some(url) => (
            vec![Candidate {
                label: "url".to_string(),
                id: Some("agent-url".to_string()),
                name: Some("Agent URL".to_string()),
                url: Some(url),
                protocol: str_field(obj, "preferredTransport")
                    .map(|t| t.to_lowercase())
                    .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            }],
            true,
        ),
        None => (Vec::new(), false),
    }
}

fn candidate_from(item: &Value, label: String, protocol: &str) -> Candidate {
    match item {
        Value::Object(entry) => Candidate {
            id: str_field(entry, "id"),
            name: str_field(entry, "name"),
            url: str_field(entry, "url"),
            protocol: str_field(entry, "protocol")
                .or_else(|| str_field(entry, "transport"))
                .map(|p| p.to_lowercase())
                .unwrap_or_else(|| protocol.to_string()),
            label,
        },
        _ => Candidate {
            label,
            id: None,
            name: None,
            url: None,
            protocol: protocol.to_string(),
        },
    }
}

fn validate_endpoint(candidate: Candidate, index: usize) -> std::result::Result<AgentEndpoint, String> {
    let Some(raw_url) = candidate.url else {
        return Err(format!("{}: url is required", candidate.label));
    };
    if !is_absolute_url(&raw_url) {
        return Err(format!(
            "{}: '{raw_url}' is not a valid absolute URL",
            candidate.label
        ));
    }

    let id = candidate
        .id
        .unwrap_or_else(|| format!("{}-{}", candidate.protocol, index + 1));
    let name = candidate
        .name
        .unwrap_or_else(|| format!("Endpoint {}", index + 1));

    Ok(AgentEndpoint {
        id,
        name,
        url: raw_url,
        protocol: candidate.protocol,
    })
}

/// `additionalInterfaces` entries that add a new, valid URL.
fn additional_interfaces(obj: &Map<String, Value>, known: &[AgentEndpoint]) -> Vec<AgentEndpoint> {
    let Some(items) = obj.get("additionalInterfaces").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut extra: Vec<AgentEndpoint> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Some(entry) = item.as_object() else {
            continue;
        };
        let Some(url) = str_field(entry, "url").filter(|u| is_absolute_url(u)) else {
            debug!("ignoring additionalInterfaces[{i}] without a valid url");
            continue;
        };
        if known.iter().chain(extra.iter()).any(|e| e.url == url) {
            continue;
        }
        let protocol = str_field(entry, "transport")
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());
        extra.push(AgentEndpoint {
            id: format!("interface-{}", i + 1),
            name: format!("{} interface", protocol.to_uppercase()),
            url,
            protocol,
        });
    }
    extra
}

pub(crate) fn is_absolute_url(raw: &str) -> bool {
    Url::parse(raw).is_ok_and(|u| !u.cannot_be_a_base() && u.has_host())
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

fn parse_provider(value: &Value) -> Option<AgentProvider> {
    let obj = value.as_object()?;
    let provider = AgentProvider {
        organization: str_field(obj, "organization"),
        url: str_field(obj, "url"),
    };
    if provider.organization.is_none() && provider.url.is_none() {
        None
    } else {
        Some(provider)
    }
}

/// Bare strings become named skills; objects need a `name` (or at least
/// an `id`) and are skipped otherwise.
fn parse_skills(value: Option<&Value>) -> Vec<AgentSkill> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) if !name.trim().is_empty() => {
                Some(AgentSkill::named(name.trim()))
            }
            Value::Object(skill) => {
                let id = str_field(skill, "id");
                let name = str_field(skill, "name").or_else(|| id.clone())?;
                Some(AgentSkill {
                    name,
                    id,
                    description: str_field(skill, "description"),
                    examples: string_list(skill.get("examples")),
                    tags: string_list(skill.get("tags")),
                    input_modes: string_list(skill.get("inputModes")),
                    output_modes: string_list(skill.get("outputModes")),
                })
            }
            _ => None,
        })
        .collect()
}

fn parse_capabilities(value: Option<&Value>) -> AgentCapabilities {
    let flag = |key: &str| {
        value
            .and_then(|caps| caps.get(key))
            .is_some_and(|v| *v == Value::Bool(true))
    };

    AgentCapabilities {
        streaming: flag("streaming"),
        push_notifications: flag("pushNotifications"),
        state_transition_history: flag("stateTransitionHistory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors_of(result: Result<AgentCard>) -> Vec<String> {
        match result {
            Err(Error::InvalidCard(errors)) => errors,
            other => panic!("expected InvalidCard, got {other:?}"),
        }
    }

    #[test]
    fn root_url_becomes_agent_url_endpoint() {
        let payload = json!({
            "name": "Echo",
            "url": "https://x/a",
            "capabilities": { "streaming": false }
        });

        let card = normalize_agent_card(&payload, None).unwrap();
        assert_eq!(card.endpoints.len(), 1);
        assert_eq!(card.endpoints[0].url, "https://x/a");
        assert_eq!(card.endpoints[0].name, "Agent URL");
        assert!(!card.capabilities.streaming);
        assert_eq!(card.url, "https://x/a");
        assert_eq!(card.id.as_str(), "Echo");
        assert_eq!(card.raw, payload);
    }

    #[test]
    fn missing_name_is_reported_with_other_errors() {
        let payload = json!({
            "endpoints": [{ "url": "not a url" }, { "name": "no url" }]
        });

        let errors = errors_of(normalize_agent_card(&payload, None));
        assert!(errors.contains(&"name is required".to_string()));
        assert!(errors.iter().any(|e| e.starts_with("endpoints[0]:")));
        assert!(errors.iter().any(|e| e.starts_with("endpoints[1]: url is required")));
        assert!(errors.iter().any(|e| e.starts_with("at least one endpoint")));
    }

    #[test]
    fn missing_name_alone_still_fails() {
        let errors = errors_of(normalize_agent_card(&json!({ "url": "https://ok.example" }), None));
        assert_eq!(errors, vec!["name is required".to_string()]);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let errors = errors_of(normalize_agent_card(&json!(["name"]), None));
        assert_eq!(errors, vec!["agent card must be a JSON object".to_string()]);
    }

    #[test]
    fn card_without_any_endpoint_fails() {
        let errors = errors_of(normalize_agent_card(&json!({ "name": "Lonely" }), None));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("at least one endpoint"));
    }

    #[test]
    fn endpoints_array_takes_precedence_over_root_url() {
        let payload = json!({
            "name": "Multi",
            "url": "https://root.example/rpc",
            "endpoints": [
                { "id": "primary", "name": "Primary", "url": "https://a.example/rpc", "protocol": "JSONRPC" },
                { "url": "https://b.example/rpc" }
            ]
        });

        let card = normalize_agent_card(&payload, Some("https://a.example/.well-known/agent-card.json")).unwrap();
        let urls: Vec<_> = card.endpoints.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://a.example/rpc", "https://b.example/rpc"]);
        assert_eq!(card.endpoints[0].id, "primary");
        assert_eq!(card.endpoints[0].protocol, "jsonrpc");
        assert_eq!(card.endpoints[1].name, "Endpoint 2");
        assert_eq!(card.url, "https://a.example/.well-known/agent-card.json");
    }

    #[test]
    fn endpoints_keyed_by_transport() {
        let payload = json!({
            "name": "Keyed",
            "endpoints": {
                "http": [{ "url": "https://h.example" }],
                "jsonrpc": [{ "url": "https://j.example" }]
            }
        });

        let card = normalize_agent_card(&payload, None).unwrap();
        assert_eq!(card.endpoints[0].url, "https://j.example");
        assert_eq!(card.endpoints[0].protocol, "jsonrpc");
        assert_eq!(card.endpoints[1].protocol, "http");
    }

    #[test]
    fn singular_endpoint_object() {
        let payload = json!({
            "name": "Single",
            "endpoint": { "url": "https://s.example/a2a", "name": "Main" }
        });
        let card = normalize_agent_card(&payload, None).unwrap();
        assert_eq!(card.endpoints[0].name, "Main");
        assert_eq!(card.endpoints[0].url, "https://s.example/a2a");
    }

    #[test]
    fn additional_interfaces_follow_root_url() {
        let payload = json!({
            "name": "Interfaces",
            "url": "https://main.example/rpc",
            "additionalInterfaces": [
                { "url": "https://main.example/rpc", "transport": "JSONRPC" },
                { "url": "https://grpc.example", "transport": "GRPC" },
                { "url": "relative/path", "transport": "HTTP+JSON" }
            ]
        });
        let card = normalize_agent_card(&payload, None).unwrap();
        let urls: Vec<_> = card.endpoints.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["https://main.example/rpc", "https://grpc.example"]);
        assert_eq!(card.endpoints[1].protocol, "grpc");
    }

    #[test]
    fn id_resolution_order() {
        let explicit = json!({ "name": "N", "agentId": "agent-7", "url": "https://x.example" });
        assert_eq!(normalize_agent_card(&explicit, Some("https://src")).unwrap().id.as_str(), "agent-7");

        let from_source = json!({ "name": "N", "url": "https://x.example" });
        assert_eq!(normalize_agent_card(&from_source, Some("https://src")).unwrap().id.as_str(), "https://src");

        let from_name = json!({ "name": "N", "endpoint": { "url": "https://x.example" } });
        assert_eq!(normalize_agent_card(&from_name, None).unwrap().id.as_str(), "N");
    }

    #[test]
    fn skills_accept_strings_and_skip_nameless_objects() {
        let payload = json!({
            "name": "Skilled",
            "url": "https://x.example",
            "skills": [
                "summarize",
                { "id": "translate", "tags": ["lang"], "examples": ["hola"] },
                { "description": "no name at all" },
                42
            ]
        });

        let card = normalize_agent_card(&payload, None).unwrap();
        assert_eq!(card.skills.len(), 2);
        assert_eq!(card.skills[0], AgentSkill::named("summarize"));
        assert_eq!(card.skills[1].name, "translate");
        assert_eq!(card.skills[1].tags, Some(vec!["lang".to_string()]));
    }

    #[test]
    fn capabilities_require_strict_true() {
        let payload = json!({
            "name": "Caps",
            "url": "https://x.example",
            "capabilities": { "streaming": "true", "pushNotifications": true, "stateTransitionHistory": 1 }
        });
        let caps = normalize_agent_card(&payload, None).unwrap().capabilities;
        assert!(!caps.streaming);
        assert!(caps.push_notifications);
        assert!(!caps.state_transition_history);
    }

    #[test]
    fn pasted_text_that_is_not_json() {
        let errors = errors_of(parse_card_text("{ nope", None));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("agent card is not valid JSON"));
    }
}
