//! `ChatBackend`, the server seam of the session, and its HTTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::multipart::{Form, Part};
use serde_json::json;

use super::client::{ApiClient, ApiError};
use super::types::{AiFeatures, ChatSummary, MessagesHistory, SendMessageRequest, Transcription};
use crate::transport::{
    AuthSession, EventStream, FilePart, StreamOptions, StreamTransport, build_http_client,
};

pub const SEND_MESSAGE_PATH: &str = "/chat/send-message";

/// Everything the chat session needs from the server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens the event stream of one turn. Lazy: nothing is sent until polled.
    fn send_message(&self, request: SendMessageRequest) -> EventStream;

    /// One history page. `before` selects messages older than that id.
    async fn load_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<MessagesHistory, ApiError>;

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError>;

    async fn transcribe(&self, audio: FilePart) -> Result<Transcription, ApiError>;

    async fn update_max_tokens(&self, chat_id: &str, max_tokens: u32) -> Result<(), ApiError>;

    async fn update_temperature(&self, chat_id: &str, temperature: f32) -> Result<(), ApiError>;

    async fn update_ai_features(
        &self,
        chat_id: &str,
        features: AiFeatures,
    ) -> Result<(), ApiError>;
}

/// [`ChatBackend`] over HTTP.
#[derive(Clone)]
pub struct ChatApi {
    api: ApiClient,
    stream: StreamTransport,
    stream_timeout: Option<Duration>,
}

impl ChatApi {
    pub fn new(base_url: &str, auth: Arc<dyn AuthSession>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = build_http_client();
        Self {
            api: ApiClient::new(client.clone(), base_url.clone(), auth.clone()),
            stream: StreamTransport::new(client, base_url, auth),
            stream_timeout: None,
        }
    }

    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }
}

#[async_trait]
impl ChatBackend for ChatApi {
    fn send_message(&self, request: SendMessageRequest) -> EventStream {
        info!(
            "Sending message (model={}, chat={:?}, file={})",
            request.model,
            request.chat_id,
            request.file.is_some()
        );
        let options = StreamOptions {
            timeout: self.stream_timeout,
            ..StreamOptions::default()
        };
        self.stream
            .open(SEND_MESSAGE_PATH, request.into_payload(), options)
    }

    async fn load_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<MessagesHistory, ApiError> {
        let path = format!("/chat/{}/messages", chat_id);
        match before {
            Some(id) => {
                self.api
                    .get_json(&path, &[("beforeMessageId", id)])
                    .await
            }
            None => self.api.get_json(&path, &[]).await,
        }
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.api.get_json("/chat", &[]).await
    }

    async fn transcribe(&self, audio: FilePart) -> Result<Transcription, ApiError> {
        let part = Part::bytes(audio.bytes)
            .file_name(audio.file_name)
            .mime_str(&audio.mime)
            .map_err(|e| ApiError::Request(format!("invalid audio type: {e}")))?;
        let form = Form::new().part("audio", part);
        self.api.post_multipart_json("/chat/transcribe", form).await
    }

    async fn update_max_tokens(&self, chat_id: &str, max_tokens: u32) -> Result<(), ApiError> {
        info!("Saving maxTokens={} for {}", max_tokens, chat_id);
        self.api
            .patch_json(
                &format!("/chat/{}/update-max-tokens", chat_id),
                &json!({ "maxTokens": max_tokens }),
            )
            .await
    }

    async fn update_temperature(&self, chat_id: &str, temperature: f32) -> Result<(), ApiError> {
        info!("Saving temperature={} for {}", temperature, chat_id);
        self.api
            .patch_json(
                &format!("/chat/{}/update-temperature", chat_id),
                &json!({ "temperature": temperature }),
            )
            .await
    }

    async fn update_ai_features(
        &self,
        chat_id: &str,
        features: AiFeatures,
    ) -> Result<(), ApiError> {
        info!("Saving {:?} for {}", features, chat_id);
        self.api
            .patch_json(&format!("/chat/{}/update-ai-features", chat_id), &features)
            .await
    }
}
