//! Per-agent conversation and task state.
//!
//! Everything the dashboard knows about one agent lives in a single
//! [`AgentState`] keyed by [`AgentId`], so removing an agent tears down all
//! of it at once and an update never touches another agent's entry.

use std::sync::{PoisonError, RwLock};

use a2ascope_common::{AgentId, Error, LogEntryId, MessageId, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::a2a::model::{AgentCard, RpcMethod, TaskState};
use crate::auth::AgentAuthConfig;
use crate::card::is_absolute_url;
use crate::chat::{ChatMessage, LogCompletion, RpcLogEntry, TaskObservation, TrackedTask};

const EVENT_CAPACITY: usize = 256;

/// A registered agent as injected at startup or persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub card: AgentCard,
    #[serde(default)]
    pub auth: AgentAuthConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Registered,
    Removed,
    Settings,
    Messages,
    Logs,
    Tasks,
    Conversation,
    Selection,
}

/// Change notification for renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub agent_id: AgentId,
    pub kind: StoreEventKind,
}

/// All state owned by one agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub card: AgentCard,
    pub auth: AgentAuthConfig,
    pub registered_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub logs: Vec<RpcLogEntry>,
    pub selected_endpoint: Option<String>,
    pub endpoint_override: Option<String>,
    pub method: RpcMethod,
    pub context_id: Option<String>,
    pub active_task_id: Option<String>,
    pub tasks: Vec<TrackedTask>,
    /// Chat-level error banner.
    pub last_error: Option<String>,
}

impl AgentState {
    fn new(card: AgentCard, auth: AgentAuthConfig, method: RpcMethod) -> Self {
        Self {
            card,
            auth,
            registered_at: Utc::now(),
            messages: Vec::new(),
            logs: Vec::new(),
            selected_endpoint: None,
            endpoint_override: None,
            method,
            context_id: None,
            active_task_id: None,
            tasks: Vec::new(),
            last_error: None,
        }
    }

    /// Target URL: override, then selected endpoint, then the first endpoint.
    pub fn endpoint_url(&self) -> Option<&str> {
        if let Some(url) = self.endpoint_override.as_deref() {
            return Some(url);
        }
        self.selected_endpoint
            .as_deref()
            .and_then(|id| self.card.endpoint(id))
            .or_else(|| self.card.endpoints.first())
            .map(|e| e.url.as_str())
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Insert or refresh a tracked task. `created_at` is fixed by the
    /// first observation; everything else follows the latest one.
    pub fn upsert_task(&mut self, observation: &TaskObservation, now: DateTime<Utc>) -> &TrackedTask {
        let position = self
            .tasks
            .iter()
            .position(|t| t.task_id == observation.task_id);

        match position {
            Some(index) => {
                let task = &mut self.tasks[index];
                task.state = observation.state.clone();
                task.last_updated = now;
                task.message = observation.message.clone();
                if observation.context_id.is_some() {
                    task.context_id = observation.context_id.clone();
                }
                &self.tasks[index]
            }
            None => {
                self.tasks.push(TrackedTask {
                    task_id: observation.task_id.clone(),
                    context_id: observation.context_id.clone(),
                    state: observation.state.clone(),
                    last_updated: now,
                    created_at: now,
                    message: observation.message.clone(),
                });
                &self.tasks[self.tasks.len() - 1]
            }
        }
    }

    /// `input-required` makes the task the one the next send continues;
    /// a terminal state ends that.
    pub fn note_task_state(&mut self, task_id: &str, state: &TaskState) {
        if *state == TaskState::InputRequired {
            self.active_task_id = Some(task_id.to_string());
        } else if state.is_terminal() {
            self.active_task_id = None;
        }
    }

    fn reset_conversation(&mut self) {
        self.messages.clear();
        self.context_id = None;
        self.active_task_id = None;
        self.last_error = None;
    }
}

/// Keyed repository of every registered agent's state.
pub struct AgentStore {
    agents: DashMap<AgentId, AgentState>,
    selected: RwLock<Option<AgentId>>,
    default_method: RpcMethod,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for AgentStore {
    fn default() -> Self {
        Self::new(RpcMethod::MessageSend)
    }
}

impl AgentStore {
    pub fn new(default_method: RpcMethod) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            agents: DashMap::new(),
            selected: RwLock::new(None),
            default_method,
            events,
        }
    }

    /// Store seeded with previously registered agents.
    pub fn with_agents(
        agents: impl IntoIterator<Item = RegisteredAgent>,
        default_method: RpcMethod,
    ) -> Self {
        let store = Self::new(default_method);
        for agent in agents {
            store.register(agent.card, agent.auth);
        }
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, agent_id: &AgentId, kind: StoreEventKind) {
        // No receivers is fine.
        let _ = self.events.send(StoreEvent {
            agent_id: agent_id.clone(),
            kind,
        });
    }

    /// Read one agent's state under its lock.
    pub fn read<R>(&self, id: &AgentId, f: impl FnOnce(&AgentState) -> R) -> Option<R> {
        self.agents.get(id).map(|state| f(state.value()))
    }

    /// Mutate one agent's state atomically and announce it. Returns `None`
    /// when the agent is gone, e.g. removed while a request was in flight.
    pub fn update<R>(
        &self,
        id: &AgentId,
        kind: StoreEventKind,
        f: impl FnOnce(&mut AgentState) -> R,
    ) -> Option<R> {
        let result = {
            let mut state = self.agents.get_mut(id)?;
            f(state.value_mut())
        };
        self.emit(id, kind);
        Some(result)
    }

    fn require<R>(&self, id: &AgentId, f: impl FnOnce(&AgentState) -> R) -> Result<R> {
        self.read(id, f)
            .ok_or_else(|| Error::NotFound(format!("agent '{id}' is not registered")))
    }

    // --- registration ---

    /// Register a card. Re-registering an id replaces its card and auth
    /// and keeps the conversation.
    pub fn register(&self, card: AgentCard, auth: AgentAuthConfig) -> AgentId {
        let id = card.id.clone();
        let replaced = match self.agents.get_mut(&id) {
            Some(mut state) => {
                let keep_endpoint = state
                    .selected_endpoint
                    .as_deref()
                    .is_some_and(|ep| card.endpoint(ep).is_some());
                if !keep_endpoint {
                    state.selected_endpoint = None;
                }
                state.card = card;
                state.auth = auth;
                true
            }
            None => {
                self.agents
                    .insert(id.clone(), AgentState::new(card, auth, self.default_method));
                false
            }
        };

        info!("registered agent {id} (replaced={replaced})");
        self.emit(&id, StoreEventKind::Registered);
        id
    }

    /// Drop the agent and every piece of state it owns.
    pub fn remove(&self, id: &AgentId) -> bool {
        if self.agents.remove(id).is_none() {
            return false;
        }

        let was_selected = {
            let mut selected = self.selected.write().unwrap_or_else(PoisonError::into_inner);
            if selected.as_ref() == Some(id) {
                *selected = None;
                true
            } else {
                false
            }
        };

        info!("removed agent {id}");
        self.emit(id, StoreEventKind::Removed);
        if was_selected {
            self.emit(id, StoreEventKind::Selection);
        }
        true
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Registered agents in registration order.
    pub fn agents(&self) -> Vec<RegisteredAgent> {
        let mut entries: Vec<(DateTime<Utc>, RegisteredAgent)> = self
            .agents
            .iter()
            .map(|entry| {
                (
                    entry.registered_at,
                    RegisteredAgent {
                        card: entry.card.clone(),
                        auth: entry.auth.clone(),
                    },
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.card.id.cmp(&b.1.card.id)));
        entries.into_iter().map(|(_, agent)| agent).collect()
    }

    pub fn card(&self, id: &AgentId) -> Option<AgentCard> {
        self.read(id, |s| s.card.clone())
    }

    pub fn auth(&self, id: &AgentId) -> Option<AgentAuthConfig> {
        self.read(id, |s| s.auth.clone())
    }

    pub fn set_auth(&self, id: &AgentId, auth: AgentAuthConfig) -> bool {
        self.update(id, StoreEventKind::Settings, |s| s.auth = auth)
            .is_some()
    }

    // --- selection and per-agent settings ---

    pub fn select(&self, id: Option<&AgentId>) -> Result<()> {
        if let Some(id) = id {
            self.require(id, |_| ())?;
        }
        let mut selected = self.selected.write().unwrap_or_else(PoisonError::into_inner);
        *selected = id.cloned();
        drop(selected);

        if let Some(id) = id {
            self.emit(id, StoreEventKind::Selection);
        }
        Ok(())
    }

    pub fn selected(&self) -> Option<AgentId> {
        self.selected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn select_endpoint(&self, id: &AgentId, endpoint_id: &str) -> Result<()> {
        let known = self.require(id, |s| s.card.endpoint(endpoint_id).is_some())?;
        if !known {
            return Err(Error::Validation(format!(
                "agent '{id}' has no endpoint '{endpoint_id}'"
            )));
        }
        self.update(id, StoreEventKind::Settings, |s| {
            s.selected_endpoint = Some(endpoint_id.to_string());
        });
        Ok(())
    }

    pub fn set_endpoint_override(&self, id: &AgentId, url: Option<&str>) -> Result<()> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        if let Some(url) = url {
            if !is_absolute_url(url) {
                return Err(Error::Validation(format!(
                    "endpoint override '{url}' is not a valid absolute URL"
                )));
            }
        }
        self.update(id, StoreEventKind::Settings, |s| {
            s.endpoint_override = url.map(str::to_string);
        })
        .ok_or_else(|| Error::NotFound(format!("agent '{id}' is not registered")))
    }

    pub fn set_method(&self, id: &AgentId, method: RpcMethod) -> Result<()> {
        self.update(id, StoreEventKind::Settings, |s| s.method = method)
            .ok_or_else(|| Error::NotFound(format!("agent '{id}' is not registered")))
    }

    pub fn endpoint_url(&self, id: &AgentId) -> Option<String> {
        self.read(id, |s| s.endpoint_url().map(str::to_string))
            .flatten()
    }

    // --- messages ---

    pub fn messages(&self, id: &AgentId) -> Vec<ChatMessage> {
        self.read(id, |s| s.messages.clone()).unwrap_or_default()
    }

    pub fn append_message(&self, id: &AgentId, message: ChatMessage) -> bool {
        self.update(id, StoreEventKind::Messages, |s| s.messages.push(message))
            .is_some()
    }

    pub fn patch_message(
        &self,
        id: &AgentId,
        message_id: &MessageId,
        f: impl FnOnce(&mut ChatMessage),
    ) -> bool {
        self.update(id, StoreEventKind::Messages, |s| {
            s.message_mut(message_id).map(f).is_some()
        })
        .unwrap_or(false)
    }

    pub fn remove_message(&self, id: &AgentId, message_id: &MessageId) -> Option<ChatMessage> {
        self.update(id, StoreEventKind::Messages, |s| {
            let index = s.messages.iter().position(|m| &m.id == message_id)?;
            Some(s.messages.remove(index))
        })
        .flatten()
    }

    // --- request log ---

    pub fn logs(&self, id: &AgentId) -> Vec<RpcLogEntry> {
        self.read(id, |s| s.logs.clone()).unwrap_or_default()
    }

    pub fn append_log(&self, id: &AgentId, entry: RpcLogEntry) -> bool {
        self.update(id, StoreEventKind::Logs, |s| s.logs.push(entry))
            .is_some()
    }

    /// Complete the entry with `entry.id`, inserting `entry` first if the
    /// issuing side never got to record it. Never creates a duplicate.
    pub fn complete_log(&self, id: &AgentId, entry: &RpcLogEntry, completion: LogCompletion) -> bool {
        self.update(id, StoreEventKind::Logs, |s| {
            match s.logs.iter_mut().find(|l| l.id == entry.id) {
                Some(existing) => existing.complete(completion),
                None => {
                    debug!("log entry {} missing at completion, inserting", entry.id);
                    let mut fallback = entry.clone();
                    let completed = fallback.complete(completion);
                    s.logs.push(fallback);
                    completed
                }
            }
        })
        .unwrap_or(false)
    }

    pub fn log(&self, id: &AgentId, log_id: &LogEntryId) -> Option<RpcLogEntry> {
        self.read(id, |s| s.logs.iter().find(|l| &l.id == log_id).cloned())
            .flatten()
    }

    // --- conversation and task bookkeeping ---

    pub fn context_id(&self, id: &AgentId) -> Option<String> {
        self.read(id, |s| s.context_id.clone()).flatten()
    }

    pub fn set_context_id(&self, id: &AgentId, context_id: Option<String>) -> bool {
        self.update(id, StoreEventKind::Conversation, |s| s.context_id = context_id)
            .is_some()
    }

    pub fn active_task_id(&self, id: &AgentId) -> Option<String> {
        self.read(id, |s| s.active_task_id.clone()).flatten()
    }

    pub fn set_active_task_id(&self, id: &AgentId, task_id: Option<String>) -> bool {
        self.update(id, StoreEventKind::Conversation, |s| s.active_task_id = task_id)
            .is_some()
    }

    pub fn tasks(&self, id: &AgentId) -> Vec<TrackedTask> {
        self.read(id, |s| s.tasks.clone()).unwrap_or_default()
    }

    pub fn upsert_task(&self, id: &AgentId, observation: &TaskObservation) -> Option<TrackedTask> {
        self.update(id, StoreEventKind::Tasks, |s| {
            s.upsert_task(observation, Utc::now()).clone()
        })
    }

    pub fn last_error(&self, id: &AgentId) -> Option<String> {
        self.read(id, |s| s.last_error.clone()).flatten()
    }

    pub fn set_last_error(&self, id: &AgentId, error: Option<String>) -> bool {
        self.update(id, StoreEventKind::Conversation, |s| s.last_error = error)
            .is_some()
    }

    /// Start over: messages, context, active task, and the error banner go;
    /// tracked tasks, logs, auth, and endpoint settings stay.
    pub fn new_conversation(&self, id: &AgentId) -> bool {
        self.update(id, StoreEventKind::Conversation, AgentState::reset_conversation)
            .is_some()
    }
}
