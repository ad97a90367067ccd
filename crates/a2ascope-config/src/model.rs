use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub tasks: TaskConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tasks: TaskConfig::default(),
            chat: ChatConfig::default(),
            data_dir: None,
            log_level: None,
        }
    }
}

/// Outbound HTTP settings for talking to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Longest silence tolerated between two chunks of an SSE stream.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,

    /// Capacity of the bounded channel carrying parsed SSE frames.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            stream_buffer: default_stream_buffer(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_stream_idle_timeout_secs() -> u64 {
    120
}

fn default_stream_buffer() -> usize {
    32
}

fn default_user_agent() -> String {
    format!("a2ascope/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_history_length")]
    pub history_length: u32,
}

impl TaskConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            history_length: default_history_length(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_history_length() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// JSON-RPC method used for new agents until the user picks another.
    #[serde(default = "default_method")]
    pub default_method: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_method: default_method(),
        }
    }
}

fn default_method() -> String {
    "message/send".to_string()
}
