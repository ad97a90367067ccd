pub mod a2a;
pub mod auth;
pub mod card;
pub mod chat;
pub mod export;
pub mod extract;
pub mod registry;
pub mod session;
pub mod store;
pub mod tasks;

pub use a2a::{A2ATransport, AgentCard, HttpTransport, RpcMethod, TaskState, well_known_card_url};
pub use auth::{
    AgentAuthConfig, bearer_auth_headers, build_auth_headers, token_for_bearer_client,
    validate_auth,
};
pub use card::{normalize_agent_card, parse_card_text};
pub use chat::{ChatMessage, ChatRole, MessageStatus, RpcLogEntry, TrackedTask};
pub use export::{ExportFormat, export_conversation, to_curl};
pub use extract::extract_display_text;
pub use registry::AgentRegistry;
pub use session::{ExchangeOutcome, SessionDriver};
pub use store::{AgentStore, RegisteredAgent, StoreEvent, StoreEventKind};
pub use tasks::{TaskClient, TaskPoller};
