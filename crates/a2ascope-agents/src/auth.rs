use a2ascope_common::{Error, Result};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::a2a::client::Headers;

/// Per-agent authentication, as entered by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentAuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    ApiKey {
        header_name: String,
        header_value: String,
    },
    Custom {
        headers: Headers,
    },
}

impl AgentAuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAuthConfig::None => "none",
            AgentAuthConfig::Bearer { .. } => "bearer",
            AgentAuthConfig::ApiKey { .. } => "apiKey",
            AgentAuthConfig::Custom { .. } => "custom",
        }
    }
}

/// Headers to merge into every request sent to the agent.
pub fn build_auth_headers(auth: Option<&AgentAuthConfig>) -> Headers {
    let mut headers = Headers::new();
    match auth {
        None | Some(AgentAuthConfig::None) => {}
        Some(AgentAuthConfig::Bearer { token }) => {
            if !token.is_empty() {
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
            }
        }
        Some(AgentAuthConfig::ApiKey {
            header_name,
            header_value,
        }) => {
            if !header_name.is_empty() && !header_value.is_empty() {
                headers.insert(header_name.clone(), header_value.clone());
            }
        }
        Some(AgentAuthConfig::Custom { headers: custom }) => {
            headers.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    headers
}

/// Token for clients that only understand bearer auth. Empty for every
/// other auth type; those must go through [`build_auth_headers`].
pub fn token_for_bearer_client(auth: Option<&AgentAuthConfig>) -> String {
    match auth {
        Some(AgentAuthConfig::Bearer { token }) => token.clone(),
        _ => String::new(),
    }
}

/// Headers for paths that only carry bearer auth, such as card discovery.
pub fn bearer_auth_headers(auth: Option<&AgentAuthConfig>) -> Headers {
    let token = token_for_bearer_client(auth);
    let mut headers = Headers::new();
    if !token.is_empty() {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }
    headers
}

/// Reject auth that would produce no header at all, or headers that
/// cannot go on the wire.
pub fn validate_auth(auth: Option<&AgentAuthConfig>) -> Result<()> {
    let produced = build_auth_headers(auth);
    for (name, value) in &produced {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(Error::Auth(format!(
                "'{name}' is not a valid HTTP header name. \
                 Use letters, digits and dashes without spaces."
            )));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(Error::Auth(format!(
                "The value of header '{name}' contains characters HTTP headers cannot carry."
            )));
        }
    }
    match auth {
        Some(AgentAuthConfig::ApiKey { .. }) if produced.is_empty() => Err(Error::Auth(
            "API key auth is selected but the header name or value is empty. \
             Fill in both, or switch the agent to no authentication."
                .to_string(),
        )),
        Some(AgentAuthConfig::Custom { .. }) if produced.is_empty() => Err(Error::Auth(
            "Custom header auth is selected but no headers are defined. \
             Add at least one header, or switch the agent to no authentication."
                .to_string(),
        )),
        _ => Ok(()),
    }
}
