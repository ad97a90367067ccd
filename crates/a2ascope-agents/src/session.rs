//! Sending chat messages to an agent.
//!
//! One [`SessionDriver::send`] call walks a message through building the
//! JSON-RPC envelope, dispatching it (as a single call or as a stream of
//! server-sent events), applying every frame to the agent's state in
//! arrival order, and finalizing the assistant message and request log.

use std::sync::Arc;
use std::time::Instant;

use a2ascope_common::{AgentId, Error, LogEntryId, MessageId, Result};
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::a2a::client::{A2ATransport, Headers};
use crate::a2a::model::{AgentCard, JsonRpcRequest, RpcMethod, TaskState};
use crate::a2a::sse::SseFrame;
use crate::auth::{AgentAuthConfig, build_auth_headers, validate_auth};
use crate::chat::{
    ChatMessage, ChatRole, LogCompletion, LogStatus, MessageStatus, RpcLogEntry, TaskObservation,
};
use crate::extract::{extract_content, extract_display_text, protocol_body, protocol_error, state_fallback};
use crate::store::{AgentState, AgentStore, StoreEventKind};

const EMPTY_REPLY: &str = "The agent did not return any content.";

/// How one exchange ended.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub message_id: MessageId,
    pub log_id: LogEntryId,
    pub status: MessageStatus,
    pub content: String,
    pub streamed: bool,
}

impl ExchangeOutcome {
    pub fn is_error(&self) -> bool {
        self.status == MessageStatus::Error
    }
}

/// Everything read from the store before dispatch.
struct Prepared {
    card: AgentCard,
    auth: AgentAuthConfig,
    method: RpcMethod,
    url: Option<String>,
    context_id: Option<String>,
    active_task_id: Option<String>,
}

impl Prepared {
    fn read(state: &AgentState) -> Self {
        Self {
            card: state.card.clone(),
            auth: state.auth.clone(),
            method: state.method,
            url: state.endpoint_url().map(str::to_string),
            context_id: state.context_id.clone(),
            active_task_id: state.active_task_id.clone(),
        }
    }

    fn streaming(&self) -> bool {
        self.method == RpcMethod::MessageStream || self.card.supports_streaming()
    }
}

/// What applying one frame changed.
#[derive(Debug, Default)]
struct FrameEffect {
    state: Option<TaskState>,
    error: Option<String>,
}

/// Drives chat exchanges for every agent in a store.
pub struct SessionDriver<T> {
    transport: Arc<T>,
    store: Arc<AgentStore>,
}

impl<T> Clone for SessionDriver<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
        }
    }
}

impl<T: A2ATransport> SessionDriver<T> {
    pub fn new(transport: Arc<T>, store: Arc<AgentStore>) -> Self {
        Self { transport, store }
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    /// Send user text to an agent.
    ///
    /// Input problems (unknown agent, empty text, `tasks/get`, broken auth)
    /// are returned as errors before anything is recorded. Once dispatched,
    /// transport and protocol failures end up in the returned outcome, the
    /// assistant message, and the agent's `last_error` instead.
    #[instrument(skip(self, text), fields(agent = %agent_id))]
    pub async fn send(&self, agent_id: &AgentId, text: &str) -> Result<ExchangeOutcome> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message text is empty".to_string()));
        }
        let prepared = self.prepare(agent_id)?;
        self.store.append_message(agent_id, ChatMessage::user(text));
        self.dispatch(agent_id, text, prepared).await
    }

    /// Replay the user text behind a failed assistant reply as a new send.
    /// The failed reply is removed; the user message is not duplicated.
    #[instrument(skip(self), fields(agent = %agent_id))]
    pub async fn retry(&self, agent_id: &AgentId, failed: &MessageId) -> Result<ExchangeOutcome> {
        let messages = self.store.messages(agent_id);
        let index = messages
            .iter()
            .position(|m| &m.id == failed)
            .ok_or_else(|| Error::NotFound(format!("message '{failed}' not found")))?;

        let reply = &messages[index];
        if reply.role != ChatRole::Assistant || reply.status != MessageStatus::Error {
            return Err(Error::Validation(
                "only failed assistant replies can be retried".to_string(),
            ));
        }
        let text = messages[..index]
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .ok_or_else(|| Error::Validation("no user message precedes this reply".to_string()))?;

        let prepared = self.prepare(agent_id)?;
        self.store.remove_message(agent_id, failed);
        self.dispatch(agent_id, &text, prepared).await
    }

    /// The most recent failed assistant reply, for a bare "retry" command.
    pub fn last_failed_reply(&self, agent_id: &AgentId) -> Option<MessageId> {
        self.store
            .messages(agent_id)
            .into_iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
            .filter(|m| m.status == MessageStatus::Error)
            .map(|m| m.id)
    }

    fn prepare(&self, agent_id: &AgentId) -> Result<Prepared> {
        let prepared = self
            .store
            .read(agent_id, Prepared::read)
            .ok_or_else(|| Error::NotFound(format!("agent '{agent_id}' is not registered")))?;

        if prepared.method == RpcMethod::TasksGet {
            return Err(Error::Validation(
                "tasks/get fetches a task by id; chat with message/send or message/stream"
                    .to_string(),
            ));
        }
        validate_auth(Some(&prepared.auth))?;
        if prepared.url.is_none() {
            return Err(Error::Validation(format!(
                "agent '{agent_id}' has no endpoint to send to"
            )));
        }
        Ok(prepared)
    }

    async fn dispatch(
        &self,
        agent_id: &AgentId,
        text: &str,
        prepared: Prepared,
    ) -> Result<ExchangeOutcome> {
        let url = prepared
            .url
            .clone()
            .ok_or_else(|| Error::Validation("no endpoint to send to".to_string()))?;
        let streaming = prepared.streaming();
        let method = if streaming {
            RpcMethod::MessageStream
        } else {
            RpcMethod::MessageSend
        };

        let params = JsonRpcRequest::message_params(
            text,
            prepared.context_id.as_deref(),
            prepared.active_task_id.as_deref(),
        );
        let request = JsonRpcRequest::new(method, params);
        let headers = request_headers(&prepared, streaming);

        self.store.set_last_error(agent_id, None);
        let log = RpcLogEntry::started(&url, serde_json::to_value(&request)?, headers.clone());
        self.store.append_log(agent_id, log.clone());

        info!(
            "dispatching {} to {url} (streaming={streaming}, continuing_task={})",
            request.method,
            prepared.active_task_id.is_some()
        );
        let started = Instant::now();

        if streaming {
            self.run_stream(agent_id, &url, &headers, &request, log, started)
                .await
        } else {
            self.run_call(agent_id, &url, &headers, &request, log, started)
                .await
        }
    }

    async fn run_call(
        &self,
        agent_id: &AgentId,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
        log: RpcLogEntry,
        started: Instant,
    ) -> Result<ExchangeOutcome> {
        let placeholder = ChatMessage::assistant("", MessageStatus::Pending);
        let message_id = placeholder.id.clone();
        self.store.append_message(agent_id, placeholder);

        let (payload, http_status, content, error) =
            match self.transport.call(url, headers, request).await {
                Ok(reply) => {
                    let effect = self.apply_frame(agent_id, &message_id, &reply.body);
                    let content = extract_display_text(&reply.body);
                    let error = effect.error.or_else(|| failed_state_error(&effect.state));
                    (reply.body, Some(reply.status), content, error)
                }
                Err(e) => {
                    warn!("request to {url} failed: {e}");
                    let (payload, http_status) = failure_payload(&e);
                    let content = format!("Request failed: {}", e.user_message());
                    (payload, http_status, content, Some(e.user_message()))
                }
            };

        self.finalize(
            agent_id,
            &message_id,
            &log,
            Finish {
                content,
                error,
                payload,
                http_status,
                started,
                streamed: false,
            },
        )
    }

    async fn run_stream(
        &self,
        agent_id: &AgentId,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
        log: RpcLogEntry,
        started: Instant,
    ) -> Result<ExchangeOutcome> {
        let placeholder = ChatMessage::streaming_placeholder();
        let message_id = placeholder.id.clone();
        self.store.append_message(agent_id, placeholder);

        let mut frames = match self.transport.stream(url, headers, request).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("stream request to {url} failed: {e}");
                let (payload, http_status) = failure_payload(&e);
                return self.finalize(
                    agent_id,
                    &message_id,
                    &log,
                    Finish {
                        content: format!("Request failed: {}", e.user_message()),
                        error: Some(e.user_message()),
                        payload,
                        http_status,
                        started,
                        streamed: true,
                    },
                );
            }
        };

        let mut received = Vec::new();
        let mut last_state: Option<TaskState> = None;
        let mut frame_error: Option<String> = None;
        let mut stream_error: Option<Error> = None;

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(SseFrame::Data(value)) => {
                    debug!("frame {} received", received.len());
                    let effect = self.apply_frame(agent_id, &message_id, &value);
                    if effect.state.is_some() {
                        last_state = effect.state;
                    }
                    if frame_error.is_none() {
                        frame_error = effect.error;
                    }
                    received.push(value);
                }
                Ok(SseFrame::Done) => {
                    debug!("end of stream marker after {} frames", received.len());
                    break;
                }
                Err(e) => {
                    warn!("stream from {url} broke off after {} frames: {e}", received.len());
                    stream_error = Some(e);
                    break;
                }
            }
        }

        let shown = self
            .store
            .read(agent_id, |s| {
                s.messages
                    .iter()
                    .find(|m| m.id == message_id)
                    .map(|m| m.content.clone())
            })
            .flatten()
            .unwrap_or_default();

        let content = if !shown.is_empty() {
            shown
        } else if let Some(e) = &stream_error {
            format!("Request failed: {}", e.user_message())
        } else if let Some(state) = &last_state {
            state_fallback(Some(state.as_str()))
        } else {
            EMPTY_REPLY.to_string()
        };

        let error = stream_error
            .as_ref()
            .map(Error::user_message)
            .or(frame_error)
            .or_else(|| failed_state_error(&last_state));

        self.finalize(
            agent_id,
            &message_id,
            &log,
            Finish {
                content,
                error,
                payload: Value::Array(received),
                http_status: Some(200),
                started,
                streamed: true,
            },
        )
    }

    /// Apply one response body to the agent atomically: conversation id,
    /// task bookkeeping, and the latest displayable content.
    fn apply_frame(&self, agent_id: &AgentId, message_id: &MessageId, frame: &Value) -> FrameEffect {
        let body = protocol_body(frame);
        let observation = body.and_then(TaskObservation::from_body);
        let context_id = body
            .and_then(|b| b.get("contextId"))
            .and_then(Value::as_str);
        let content = extract_content(frame);
        let error = protocol_error(frame);

        let kind = if observation.is_some() {
            StoreEventKind::Tasks
        } else {
            StoreEventKind::Messages
        };
        self.store.update(agent_id, kind, |state| {
            if let Some(context_id) = context_id {
                state.context_id = Some(context_id.to_string());
            }
            if let Some(observation) = &observation {
                state.upsert_task(observation, Utc::now());
                state.note_task_state(&observation.task_id, &observation.state);
            }
            if let Some(message) = state.message_mut(message_id) {
                if let Some(content) = &content {
                    message.content = content.clone();
                }
                if let Some(observation) = &observation {
                    message.task_id = Some(observation.task_id.clone());
                    message.task_state = Some(observation.state.clone());
                }
            }
        });

        FrameEffect {
            state: observation.map(|o| o.state),
            error,
        }
    }

    fn finalize(
        &self,
        agent_id: &AgentId,
        message_id: &MessageId,
        log: &RpcLogEntry,
        finish: Finish,
    ) -> Result<ExchangeOutcome> {
        let duration_ms = u64::try_from(finish.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = if finish.error.is_some() {
            MessageStatus::Error
        } else {
            MessageStatus::Complete
        };

        self.store.patch_message(agent_id, message_id, |m| {
            m.content = finish.content.clone();
            m.status = status;
            m.error = finish.error.clone();
        });
        self.store.set_last_error(agent_id, finish.error.clone());
        self.store.complete_log(
            agent_id,
            log,
            LogCompletion {
                response_payload: finish.payload,
                status: if finish.error.is_some() {
                    LogStatus::Error
                } else {
                    LogStatus::Success
                },
                http_status: finish.http_status,
                completed_at: Utc::now(),
                duration_ms,
            },
        );

        match &finish.error {
            Some(error) => warn!("exchange with {agent_id} finished with error in {duration_ms}ms: {error}"),
            None => info!("exchange with {agent_id} finished in {duration_ms}ms"),
        }

        Ok(ExchangeOutcome {
            message_id: message_id.clone(),
            log_id: log.id.clone(),
            status,
            content: finish.content,
            streamed: finish.streamed,
        })
    }
}

struct Finish {
    content: String,
    error: Option<String>,
    payload: Value,
    http_status: Option<u16>,
    started: Instant,
    streamed: bool,
}

/// Content-Type, Accept, then the agent's auth headers.
fn request_headers(prepared: &Prepared, streaming: bool) -> Headers {
    let accept = if streaming && prepared.card.supports_streaming() {
        "text/event-stream"
    } else {
        "application/json"
    };
    let mut headers = Headers::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("Accept".to_string(), accept.to_string());
    headers.extend(build_auth_headers(Some(&prepared.auth)));
    headers
}

fn failed_state_error(state: &Option<TaskState>) -> Option<String> {
    match state {
        Some(TaskState::Failed) => Some(state_fallback(Some("failed"))),
        _ => None,
    }
}

/// Stand-in response recorded when no response arrived.
fn failure_payload(error: &Error) -> (Value, Option<u16>) {
    let http_status = match error {
        Error::Http { status, .. } => Some(*status),
        _ => None,
    };
    let payload = json!({
        "error": {
            "message": error.to_string(),
            "retryable": error.is_retryable(),
        }
    });
    (payload, http_status)
}
