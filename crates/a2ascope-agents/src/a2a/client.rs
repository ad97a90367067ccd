use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use a2ascope_common::{Error, Result};
use a2ascope_config::ClientConfig;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, Stream};
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use super::model::JsonRpcRequest;
use super::sse::{SseDecoder, SseFrame};

/// Well-known path of the agent card.
pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";
const LEGACY_AGENT_CARD_PATH: &str = "/.well-known/agent.json";

/// Outbound header map. Names are kept exactly as the user wrote them.
pub type Headers = BTreeMap<String, String>;

/// Frames of one streaming exchange, in arrival order.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// A completed non-streaming JSON-RPC exchange.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub status: u16,
    pub body: Value,
}

/// Append the well-known card path to a base URL unless it is already there.
pub fn well_known_card_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with(AGENT_CARD_PATH) || trimmed.ends_with(LEGACY_AGENT_CARD_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{AGENT_CARD_PATH}")
    }
}

/// HTTP capabilities the session engine needs from the outside world.
#[async_trait]
pub trait A2ATransport: Send + Sync {
    /// GET an agent card payload.
    async fn fetch_card(&self, url: &str, headers: &Headers) -> Result<Value>;

    /// POST a JSON-RPC request and wait for the whole reply.
    async fn call(&self, url: &str, headers: &Headers, request: &JsonRpcRequest)
    -> Result<RpcReply>;

    /// POST a JSON-RPC request and read the reply as server-sent events.
    /// A reply that is not `text/event-stream` is delivered as one data
    /// frame followed by [`SseFrame::Done`].
    async fn stream(
        &self,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
    ) -> Result<FrameStream>;
}

/// [`A2ATransport`] over `reqwest`.
pub struct HttpTransport {
    http: Client,
    request_timeout: Duration,
    idle_timeout: Duration,
    stream_buffer: usize,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            request_timeout: config.request_timeout(),
            idle_timeout: config.stream_idle_timeout(),
            stream_buffer: config.stream_buffer.max(1),
        })
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.request_timeout)
        } else {
            Error::Transport(format!("request to {url} failed: {e}"))
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Http { status, body })
    }
}

fn header_map(headers: &Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Validation(format!("invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::Validation(format!("invalid value for header '{name}'")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[async_trait]
impl A2ATransport for HttpTransport {
    #[instrument(skip(self, headers))]
    async fn fetch_card(&self, url: &str, headers: &Headers) -> Result<Value> {
        let response = self
            .http
            .get(url)
            .headers(header_map(headers)?)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        let response = Self::ensure_success(response).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Protocol(format!("agent card at {url} is not valid JSON: {e}")))
    }

    #[instrument(skip(self, headers, request), fields(method = %request.method))]
    async fn call(
        &self,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
    ) -> Result<RpcReply> {
        let response = self
            .http
            .post(url)
            .headers(header_map(headers)?)
            .json(request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.map_send_error(url, e))?;
        let response = Self::ensure_success(response).await?;
        let status = response.status().as_u16();

        let body = response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.request_timeout)
            } else {
                Error::Protocol(format!("failed to parse JSON-RPC response: {e}"))
            }
        })?;
        debug!("rpc reply: status={status}");

        Ok(RpcReply { status, body })
    }

    #[instrument(skip(self, headers, request), fields(method = %request.method))]
    async fn stream(
        &self,
        url: &str,
        headers: &Headers,
        request: &JsonRpcRequest,
    ) -> Result<FrameStream> {
        let send = self
            .http
            .post(url)
            .headers(header_map(headers)?)
            .json(request)
            .send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| Error::Timeout(self.request_timeout))?
            .map_err(|e| self.map_send_error(url, e))?;
        let response = Self::ensure_success(response).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_event_stream {
            debug!("stream request answered without SSE, treating body as a single event");
            let body = tokio::time::timeout(self.request_timeout, response.json::<Value>())
                .await
                .map_err(|_| Error::Timeout(self.request_timeout))?
                .map_err(|e| Error::Protocol(format!("failed to parse JSON-RPC response: {e}")))?;
            let frames = vec![Ok(SseFrame::Data(body)), Ok(SseFrame::Done)];
            return Ok(Box::pin(stream::iter(frames)));
        }

        // Reader task feeds parsed frames through a bounded channel. It
        // exits when the body ends or the consumer drops the receiver.
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            let mut bytes = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::new();

            loop {
                let next = match tokio::time::timeout(idle_timeout, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("SSE stream idle for {}s, giving up", idle_timeout.as_secs());
                        let _ = tx.send(Err(Error::Timeout(idle_timeout))).await;
                        return;
                    }
                };

                match next {
                    Some(Ok(chunk)) => {
                        for frame in decoder.push(&chunk) {
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(Error::Transport(format!("stream read error: {e}"))))
                            .await;
                        return;
                    }
                    None => break,
                }
            }

            if let Some(frame) = decoder.finish() {
                let _ = tx.send(Ok(frame)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
