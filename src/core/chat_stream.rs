//! Streaming chat completion client.
//!
//! [`build_chat_request`] turns a transcript snapshot plus the new user turn
//! into an OpenAI-compatible request. [`CompletionClient`] sends it and
//! exposes the response as a lazy, cancellable stream of text fragments.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use memchr::memchr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl, ROLE_USER};
use crate::core::message::{Attachment, Message};
use crate::core::persona::RoleConfig;
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

/// Text fragments in arrival order. Ends normally on stream close and
/// silently on cancellation.
pub type FragmentStream = BoxStream<'static, Result<String, StreamError>>;

/// The newest user turn of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserTurn {
    Text {
        text: String,
        attachment: Option<Attachment>,
    },
    /// Text prompt plus an inline `data:` image URI, sent as multi-part content.
    Image { prompt: String, data_uri: String },
}

impl UserTurn {
    pub fn text(text: impl Into<String>) -> Self {
        UserTurn::Text {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(text: impl Into<String>, attachment: Attachment) -> Self {
        UserTurn::Text {
            text: text.into(),
            attachment: Some(attachment),
        }
    }

    pub fn image(prompt: impl Into<String>, data_uri: impl Into<String>) -> Self {
        UserTurn::Image {
            prompt: prompt.into(),
            data_uri: data_uri.into(),
        }
    }

    fn to_api_message(&self) -> ChatMessage {
        match self {
            UserTurn::Text {
                text,
                attachment: Some(attachment),
            } => ChatMessage::text(ROLE_USER, attachment.embed_into(text)),
            UserTurn::Text {
                text,
                attachment: None,
            } => ChatMessage::text(ROLE_USER, text.clone()),
            UserTurn::Image { prompt, data_uri } => ChatMessage::parts(
                ROLE_USER,
                vec![
                    ContentPart::Text {
                        text: prompt.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_uri.clone(),
                        },
                    },
                ],
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The request could not be sent or the body could not be read.
    Transport(String),
    /// The endpoint answered with a non-success status.
    Status { status: u16, body: String },
    /// The endpoint reported an error inside the event stream.
    Api(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(message) => write!(f, "Stream failed: {message}"),
            StreamError::Status { status, body } => {
                write!(f, "HTTP {status}\n{}", format_api_error(body))
            }
            StreamError::Api(payload) => f.write_str(&format_api_error(payload)),
        }
    }
}

impl std::error::Error for StreamError {}

/// Source of completion streams. Implemented by [`CompletionClient`] and by
/// scripted backends in tests.
pub trait CompletionBackend: Send + Sync {
    /// Start a completion for `turn` given the prior `history`. Building the
    /// request must not suspend; network work happens while the stream is
    /// polled.
    fn stream(
        &self,
        role: &RoleConfig,
        history: &[Message],
        turn: &UserTurn,
        cancel: CancellationToken,
    ) -> FragmentStream;
}

/// System prompt, then every prior message, then the new user turn.
pub fn build_chat_request(role: &RoleConfig, history: &[Message], turn: &UserTurn) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);

    if !role.system_prompt.is_empty() {
        messages.push(ChatMessage::system(role.system_prompt.clone()));
    }

    messages.extend(
        history
            .iter()
            .map(|message| ChatMessage::text(message.role.as_str(), message.api_content())),
    );

    messages.push(turn.to_api_message());

    ChatRequest {
        model: role.model.clone(),
        messages,
        stream: true,
    }
}

#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self::with_http_client(client, base_url, api_key))
    }

    pub fn with_http_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl CompletionBackend for CompletionClient {
    fn stream(
        &self,
        role: &RoleConfig,
        history: &[Message],
        turn: &UserTurn,
        cancel: CancellationToken,
    ) -> FragmentStream {
        let pending = PendingRequest {
            client: self.client.clone(),
            url: construct_api_url(&self.base_url, "chat/completions"),
            api_key: self.api_key.clone(),
            body: build_chat_request(role, history, turn),
            cancel,
        };
        stream::unfold(StreamState::Connect(pending), next_fragment).boxed()
    }
}

/// Events decoded from the server-sent-events body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    Chunk(String),
    Error(String),
    End,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn parse_data_payload(payload: &str) -> Option<SseEvent> {
    if payload == "[DONE]" {
        return Some(SseEvent::End);
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let choice = response.choices.into_iter().next()?;
            if let Some(reason) = &choice.finish_reason {
                debug!(finish_reason = %reason, "Completion choice finished");
            }
            choice
                .delta
                .content
                .filter(|content| !content.is_empty())
                .map(SseEvent::Chunk)
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return None;
            }
            Some(SseEvent::Error(payload.to_string()))
        }
    }
}

fn parse_sse_line(line: &str) -> Option<SseEvent> {
    extract_data_payload(line).and_then(parse_data_payload)
}

/// Splits a byte stream into lines and decodes each `data:` line. Partial
/// lines, including split UTF-8 sequences, wait for the next chunk.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(line) => events.extend(parse_sse_line(line.trim())),
                Err(e) => warn!("Invalid UTF-8 in stream: {e}"),
            }
            self.buffer.drain(..=newline_pos);
        }

        events
    }

    /// Decode whatever is left once the body closes without a final newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        match std::str::from_utf8(&rest) {
            Ok(line) => parse_sse_line(line.trim()).into_iter().collect(),
            Err(e) => {
                warn!("Invalid UTF-8 at end of stream: {e}");
                Vec::new()
            }
        }
    }
}

struct PendingRequest {
    client: reqwest::Client,
    url: String,
    api_key: String,
    body: ChatRequest,
    cancel: CancellationToken,
}

struct OpenBody {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    cancel: CancellationToken,
}

enum StreamState {
    Connect(PendingRequest),
    Body(OpenBody),
    Done,
}

async fn next_fragment(mut state: StreamState) -> Option<(Result<String, StreamError>, StreamState)> {
    loop {
        state = match state {
            StreamState::Done => return None,
            StreamState::Connect(pending) => match connect(pending).await {
                Ok(Some(body)) => StreamState::Body(body),
                Ok(None) => return None,
                Err(err) => return Some((Err(err), StreamState::Done)),
            },
            StreamState::Body(mut body) => {
                if body.cancel.is_cancelled() {
                    debug!("Completion stream cancelled");
                    return None;
                }

                if let Some(event) = body.pending.pop_front() {
                    match event {
                        SseEvent::Chunk(content) => {
                            return Some((Ok(content), StreamState::Body(body)))
                        }
                        SseEvent::Error(payload) => {
                            return Some((Err(StreamError::Api(payload)), StreamState::Done))
                        }
                        SseEvent::End => {
                            debug!("Completion stream finished");
                            return None;
                        }
                    }
                }

                let cancel = body.cancel.clone();
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Completion stream cancelled");
                        return None;
                    }
                    next = body.bytes.next() => next,
                };

                match next {
                    Some(Ok(chunk)) => {
                        let events = body.decoder.push(&chunk);
                        body.pending.extend(events);
                    }
                    Some(Err(e)) => {
                        return Some((Err(StreamError::Transport(e.to_string())), StreamState::Done))
                    }
                    None => {
                        let events = body.decoder.finish();
                        body.pending.extend(events);
                        body.pending.push_back(SseEvent::End);
                    }
                }
                StreamState::Body(body)
            }
        };
    }
}

async fn connect(pending: PendingRequest) -> Result<Option<OpenBody>, StreamError> {
    let PendingRequest {
        client,
        url,
        api_key,
        body,
        cancel,
    } = pending;

    debug!(
        url = %url,
        model = %body.model,
        messages = body.messages.len(),
        "Opening completion stream"
    );

    let request = client
        .post(&url)
        .header("Content-Type", "application/json");
    let request = add_auth_headers(request, &api_key).json(&body);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Completion request cancelled before response");
            return Ok(None);
        }
        response = request.send() => response.map_err(|e| StreamError::Transport(e.to_string()))?,
    };

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            text = response.text() => text.unwrap_or_else(|_| "<no body>".to_string()),
        };
        return Err(StreamError::Status { status, body });
    }

    let bytes = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed();

    Ok(Some(OpenBody {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        cancel,
    }))
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}
