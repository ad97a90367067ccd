//! `tasks/get`: one-off fetches and background polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use a2ascope_common::{AgentId, Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::a2a::client::{A2ATransport, Headers};
use crate::a2a::model::{AgentCard, JsonRpcRequest, RpcMethod};
use crate::auth::{AgentAuthConfig, bearer_auth_headers, build_auth_headers};
use crate::card::normalize_agent_card;
use crate::chat::{LogCompletion, LogStatus, RpcLogEntry, TaskObservation, TrackedTask};
use crate::extract::{protocol_body, protocol_error};
use crate::store::AgentStore;

type TaskKey = (AgentId, String);

/// Fetches tasks by id and merges them into an [`AgentStore`].
pub struct TaskClient<T> {
    transport: Arc<T>,
    cards: DashMap<String, AgentCard>,
    in_flight: DashMap<TaskKey, ()>,
    history_length: Option<u32>,
}

/// Clears the in-flight mark however the fetch ends.
struct InFlight<'a> {
    map: &'a DashMap<TaskKey, ()>,
    key: TaskKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

impl<T: A2ATransport> TaskClient<T> {
    pub fn new(transport: Arc<T>, history_length: Option<u32>) -> Self {
        Self {
            transport,
            cards: DashMap::new(),
            in_flight: DashMap::new(),
            history_length,
        }
    }

    async fn card_for(&self, card_url: &str, auth: Option<&AgentAuthConfig>) -> Result<AgentCard> {
        if let Some(card) = self.cards.get(card_url) {
            return Ok(card.clone());
        }
        let payload = self
            .transport
            .fetch_card(card_url, &bearer_auth_headers(auth))
            .await?;
        let card = normalize_agent_card(&payload, Some(card_url))?;
        self.cards.insert(card_url.to_string(), card.clone());
        Ok(card)
    }

    /// Fetch a task through the agent published at `card_url` and upsert
    /// it into `agent_id`'s tracked tasks. The card is fetched once per URL.
    /// Only bearer auth can be carried on this path.
    ///
    /// Returns `Ok(None)` when a fetch for the same task is already running
    /// or the agent was removed meanwhile.
    #[instrument(skip(self, store, auth), fields(agent = %agent_id))]
    pub async fn fetch_task(
        &self,
        store: &AgentStore,
        agent_id: &AgentId,
        card_url: &str,
        task_id: &str,
        history_length: Option<u32>,
        auth: Option<&AgentAuthConfig>,
    ) -> Result<Option<TrackedTask>> {
        let Some(_guard) = self.begin(agent_id, task_id) else {
            return Ok(None);
        };

        let card = self.card_for(card_url, auth).await?;
        let endpoint = card
            .endpoints
            .first()
            .map(|e| e.url.clone())
            .ok_or_else(|| Error::Validation(format!("agent card at {card_url} has no endpoint")))?;

        let request = JsonRpcRequest::new(
            RpcMethod::TasksGet,
            JsonRpcRequest::task_params(task_id, history_length.or(self.history_length)),
        );
        let headers = json_headers(bearer_auth_headers(auth));
        self.track(store, agent_id, &endpoint, &headers, &request)
            .await
    }

    /// Fetch a task for a registered agent through its current endpoint
    /// with full auth headers, and upsert it. Returns `Ok(None)` when a
    /// fetch for the same task is already running.
    #[instrument(skip(self, store), fields(agent = %agent_id))]
    pub async fn fetch_and_track(
        &self,
        store: &AgentStore,
        agent_id: &AgentId,
        task_id: &str,
    ) -> Result<Option<TrackedTask>> {
        let Some(_guard) = self.begin(agent_id, task_id) else {
            return Ok(None);
        };

        let (url, auth) = store
            .read(agent_id, |s| (s.endpoint_url().map(str::to_string), s.auth.clone()))
            .ok_or_else(|| Error::NotFound(format!("agent '{agent_id}' is not registered")))?;
        let url = url.ok_or_else(|| Error::Validation(format!("agent '{agent_id}' has no endpoint")))?;

        let request = JsonRpcRequest::new(
            RpcMethod::TasksGet,
            JsonRpcRequest::task_params(task_id, self.history_length),
        );
        let headers = json_headers(build_auth_headers(Some(&auth)));
        self.track(store, agent_id, &url, &headers, &request).await
    }

    fn begin(&self, agent_id: &AgentId, task_id: &str) -> Option<InFlight<'_>> {
        let key = (agent_id.clone(), task_id.to_string());
        if self.in_flight.insert(key.clone(), ()).is_some() {
            debug!("fetch for task {task_id} already in flight");
            return None;
        }
        Some(InFlight {
            map: &self.in_flight,
            key,
        })
    }

    /// Send `tasks/get`, log the exchange, and upsert the task.
    async fn track(
        &self,
        store: &AgentStore,
        agent_id: &AgentId,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
    ) -> Result<Option<TrackedTask>> {
        let log = RpcLogEntry::started(url, serde_json::to_value(request)?, headers.clone());
        store.append_log(agent_id, log.clone());
        let started = Instant::now();

        let result = self.transport.call(url, headers, request).await;

        let (payload, http_status) = match &result {
            Ok(reply) => (reply.body.clone(), Some(reply.status)),
            Err(e) => (
                serde_json::json!({ "error": { "message": e.to_string() } }),
                match e {
                    Error::Http { status, .. } => Some(*status),
                    _ => None,
                },
            ),
        };
        let observation = result.and_then(|reply| task_from_reply(&reply.body));

        store.complete_log(
            agent_id,
            &log,
            LogCompletion {
                response_payload: payload,
                status: if observation.is_ok() {
                    LogStatus::Success
                } else {
                    LogStatus::Error
                },
                http_status,
                completed_at: Utc::now(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            },
        );

        let observation = observation?;
        debug!("task {} is {}", observation.task_id, observation.state);
        Ok(store.upsert_task(agent_id, &observation))
    }
}

fn json_headers(auth: Headers) -> Headers {
    let mut headers = Headers::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.extend(auth);
    headers
}

fn task_from_reply(body: &Value) -> Result<TaskObservation> {
    if let Some(error) = protocol_error(body) {
        return Err(Error::Protocol(error));
    }
    protocol_body(body)
        .and_then(TaskObservation::from_body)
        .ok_or_else(|| Error::Protocol("tasks/get reply did not contain a task".to_string()))
}

struct PollHandle {
    generation: u64,
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl PollHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn signal_stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Background `tasks/get` loops, one per (agent, task).
///
/// A loop stops by itself once the task reaches a terminal state or the
/// agent disappears. Stopping a loop (or dropping the poller) only stops
/// the timer: a fetch already on the wire finishes and completes its log
/// entry first.
pub struct TaskPoller<T> {
    client: Arc<TaskClient<T>>,
    store: Arc<AgentStore>,
    interval: Duration,
    polls: Arc<DashMap<TaskKey, PollHandle>>,
    generation: AtomicU64,
}

impl<T: A2ATransport + 'static> TaskPoller<T> {
    pub fn new(client: Arc<TaskClient<T>>, store: Arc<AgentStore>, interval: Duration) -> Self {
        Self {
            client,
            store,
            interval,
            polls: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Start polling. Returns `false` if this task is already being polled.
    pub fn start(&self, agent_id: &AgentId, task_id: &str) -> bool {
        let key = (agent_id.clone(), task_id.to_string());
        let entry = match self.polls.entry(key.clone()) {
            Entry::Occupied(existing) if existing.get().is_running() => {
                debug!("already polling task {task_id} for {agent_id}");
                return false;
            }
            entry => entry,
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (stop, mut stopped) = watch::channel(false);
        let client = Arc::clone(&self.client);
        let store = Arc::clone(&self.store);
        let polls = Arc::clone(&self.polls);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let (agent_id, task_id) = &key;
            info!("polling task {task_id} for {agent_id} every {}s", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    // a dropped sender means the poller is gone
                    _ = stopped.wait_for(|stop| *stop) => break,
                }
                if !store.contains(agent_id) {
                    debug!("agent {agent_id} removed, stopping poll of {task_id}");
                    break;
                }
                match client.fetch_and_track(&store, agent_id, task_id).await {
                    Ok(Some(task)) if task.state.is_terminal() => {
                        info!("task {task_id} reached {}, polling stopped", task.state);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => {
                        warn!("poll of task {task_id} failed, will retry: {e}");
                    }
                    Err(e) => {
                        warn!("poll of task {task_id} stopped: {e}");
                        break;
                    }
                }
                if *stopped.borrow() {
                    break;
                }
            }

            debug!("poll of task {task_id} for {agent_id} finished");
            polls.remove_if(&key, |_, poll| poll.generation == generation);
        });

        entry.insert(PollHandle {
            generation,
            handle,
            stop,
        });
        true
    }

    pub fn is_polling(&self, agent_id: &AgentId, task_id: &str) -> bool {
        self.polls
            .get(&(agent_id.clone(), task_id.to_string()))
            .is_some_and(|poll| poll.is_running())
    }

    pub fn active(&self) -> usize {
        self.polls.iter().filter(|poll| poll.is_running()).count()
    }

    pub fn stop(&self, agent_id: &AgentId, task_id: &str) -> bool {
        match self.polls.remove(&(agent_id.clone(), task_id.to_string())) {
            Some((_, poll)) => {
                poll.signal_stop();
                true
            }
            None => false,
        }
    }

    /// Stop every poll for one agent, e.g. when its view closes.
    pub fn stop_agent(&self, agent_id: &AgentId) -> usize {
        let mut stopped = 0;
        self.polls.retain(|(agent, _), poll| {
            if agent == agent_id {
                poll.signal_stop();
                stopped += 1;
                false
            } else {
                true
            }
        });
        if stopped > 0 {
            info!("stopped {stopped} task polls for {agent_id}");
        }
        stopped
    }

    pub fn stop_all(&self) {
        self.polls.retain(|_, poll| {
            poll.signal_stop();
            false
        });
    }
}

impl<T> Drop for TaskPoller<T> {
    fn drop(&mut self) {
        for poll in self.polls.iter() {
            poll.signal_stop();
        }
    }
}
