pub mod client;
pub mod model;
pub mod sse;

pub use client::{A2ATransport, FrameStream, Headers, HttpTransport, RpcReply, well_known_card_url};
pub use model::{
    AgentCapabilities, AgentCard, AgentEndpoint, AgentProvider, AgentSkill, JsonRpcRequest,
    RpcMethod, TaskState,
};
pub use sse::{SseDecoder, SseFrame};
