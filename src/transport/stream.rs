//! POST with a streamed response body, surfaced as a lazy, cancellable
//! sequence of [`StreamEvent`]s.
//!
//! ```text
//! open() ──► EventStream (nothing sent yet)
//!              │ first poll
//!              ▼
//!          POST multipart ──► auth side effects ──► chunk* ──► FrameDecoder ──► events
//! ```
//!
//! Cancellation (explicit, by drop, or by timeout) ends the sequence
//! silently. Only request, network and HTTP status failures are yielded as
//! `Err`, and the sequence ends right after one.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use log::{debug, info, warn};
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthCheck, AuthSession, authorize, check_response};
use super::event::StreamEvent;
use super::frame::{FrameDecoder, parse_frame};

/// Errors surfaced by the stream. Cancellation is not one of them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The request could not be built (e.g. an invalid attachment MIME type).
    Request(String),
    /// Connection failure before or during the body.
    Network(String),
    /// The server answered 401. Logout has already been triggered.
    Unauthorized,
    /// Any other non-success status.
    Status { status: u16, body: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(msg) => write!(f, "request error: {msg}"),
            TransportError::Network(msg) => write!(f, "network error: {msg}"),
            TransportError::Unauthorized => write!(f, "unauthorized"),
            TransportError::Status { status, body } => {
                write!(f, "stream request failed with status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// Request Payload
// ============================================================================

/// Binary part of a multipart body.
#[derive(Clone, PartialEq)]
pub struct FilePart {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for FilePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Text fields plus an optional `file` part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamPayload {
    fields: Vec<(String, String)>,
    file: Option<FilePart>,
}

impl StreamPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((name.into(), value.to_string()));
        self
    }

    pub fn file(mut self, file: FilePart) -> Self {
        self.file = Some(file);
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Value of the first field with this name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn file_part(&self) -> Option<&FilePart> {
        self.file.as_ref()
    }

    fn into_form(self) -> Result<Form, TransportError> {
        let mut form = Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        if let Some(file) = self.file {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime)
                .map_err(|e| TransportError::Request(format!("invalid attachment type: {e}")))?;
            form = form.part("file", part);
        }
        Ok(form)
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub headers: HeaderMap,
    /// Appended to the URL as a query string.
    pub params: Vec<(String, String)>,
    /// Cancels the stream automatically once elapsed (counted from first poll).
    pub timeout: Option<Duration>,
}

// ============================================================================
// Event Stream
// ============================================================================

/// Cancels an [`EventStream`] from outside, e.g. from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The lazy event sequence of one streamed request. Dropping it cancels.
pub struct EventStream {
    inner: BoxStream<'static, Result<StreamEvent, TransportError>>,
    cancel: CancellationToken,
}

impl EventStream {
    /// Wraps any event source so it gets the same cancellation behaviour.
    pub fn from_stream<S>(events: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, TransportError>> + Send + 'static,
    {
        Self::guarded(events, None)
    }

    fn guarded<S>(events: S, timeout: Option<Duration>) -> Self
    where
        S: Stream<Item = Result<StreamEvent, TransportError>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stop = {
            let cancel = cancel.clone();
            async move {
                match timeout {
                    Some(limit) => {
                        tokio::select! {
                            _ = cancel.cancelled() => debug!("Stream cancelled"),
                            _ = tokio::time::sleep(limit) => info!("Stream timed out after {:?}", limit),
                        }
                    }
                    None => {
                        cancel.cancelled().await;
                        debug!("Stream cancelled");
                    }
                }
            }
        };

        Self {
            inner: events.take_until(stop).boxed(),
            cancel,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Opens streamed POST requests against the API base URL.
#[derive(Clone)]
pub struct StreamTransport {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthSession>,
}

impl StreamTransport {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        auth: Arc<dyn AuthSession>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
        }
    }

    /// Prepares the request. Nothing is sent until the stream is polled.
    pub fn open(&self, path: &str, payload: StreamPayload, options: StreamOptions) -> EventStream {
        let url = format!("{}{}", self.base_url, path);
        info!(
            "Opening stream: POST {} (fields={}, file={}, timeout={:?})",
            url,
            payload.fields.len(),
            payload.file.is_some(),
            options.timeout
        );

        let request = payload.into_form().map(|form| {
            let mut builder = self
                .client
                .post(&url)
                .headers(options.headers)
                .multipart(form);
            if !options.params.is_empty() {
                builder = builder.query(&options.params);
            }
            builder
        });

        let state = StreamState {
            phase: Phase::Pending(request),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            auth: self.auth.clone(),
            emitted: 0,
        };

        EventStream::guarded(stream::unfold(state, next_event), options.timeout)
    }
}

enum Phase {
    Pending(Result<reqwest::RequestBuilder, TransportError>),
    Streaming(reqwest::Response),
    Finished,
}

struct StreamState {
    phase: Phase,
    decoder: FrameDecoder,
    /// Events parsed from the last chunk, not yet yielded.
    ready: VecDeque<StreamEvent>,
    auth: Arc<dyn AuthSession>,
    emitted: usize,
}

type Step = Option<(Result<StreamEvent, TransportError>, StreamState)>;

async fn next_event(mut state: StreamState) -> Step {
    loop {
        if let Some(event) = state.ready.pop_front() {
            state.emitted += 1;
            return Some((Ok(event), state));
        }

        match std::mem::replace(&mut state.phase, Phase::Finished) {
            Phase::Pending(request) => match send(request, state.auth.as_ref()).await {
                Ok(response) => state.phase = Phase::Streaming(response),
                Err(e) => return Some((Err(e), state)),
            },
            Phase::Streaming(mut response) => match response.chunk().await {
                Ok(Some(chunk)) => {
                    debug!("Raw chunk received: {} bytes", chunk.len());
                    let lines = state.decoder.push(&chunk);
                    state
                        .ready
                        .extend(lines.iter().filter_map(|line| parse_frame(line)));
                    state.phase = Phase::Streaming(response);
                }
                Ok(None) => {
                    if let Some(event) = state.decoder.finish().as_deref().and_then(parse_frame) {
                        state.ready.push_back(event);
                    }
                    info!(
                        "Stream body ended: {} events",
                        state.emitted + state.ready.len()
                    );
                }
                Err(e) => {
                    warn!("Stream body failed after {} events: {}", state.emitted, e);
                    return Some((Err(TransportError::Network(e.to_string())), state));
                }
            },
            Phase::Finished => return None,
        }
    }
}

async fn send(
    request: Result<reqwest::RequestBuilder, TransportError>,
    auth: &dyn AuthSession,
) -> Result<reqwest::Response, TransportError> {
    let response = authorize(request?, auth)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;

    debug!("Stream response status: {}", response.status());

    if check_response(auth, response.status(), response.headers()) == AuthCheck::Unauthorized {
        return Err(TransportError::Unauthorized);
    }

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        warn!("Stream request failed: {} - {}", status, body);
        return Err(TransportError::Status { status, body });
    }

    Ok(response)
}
