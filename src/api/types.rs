//! Request and response bodies of the chat backend.

use serde::{Deserialize, Serialize};

use crate::core::message::Message;
use crate::transport::{FilePart, StreamPayload};

/// Everything `/chat/send-message` needs for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    pub message: String,
    pub model: String,
    pub model_developer: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub is_image_generation: bool,
    pub is_web_search: bool,
    pub prompt_id: Option<String>,
    /// Existing conversation. `None` asks the server to create one.
    pub chat_id: Option<String>,
    pub file: Option<FilePart>,
}

impl SendMessageRequest {
    /// Multipart fields in the order the backend documents them.
    pub fn into_payload(self) -> StreamPayload {
        let mut payload = StreamPayload::new()
            .text("message", self.message)
            .text("model", self.model);
        if let Some(developer) = self.model_developer {
            payload = payload.text("modelDeveloper", developer);
        }
        payload = payload
            .text("maxTokens", self.max_tokens)
            .text("temperature", self.temperature)
            .text("isImageGeneration", self.is_image_generation)
            .text("isWebSearch", self.is_web_search);
        if let Some(prompt_id) = self.prompt_id {
            payload = payload.text("promptId", prompt_id);
        }
        if let Some(chat_id) = self.chat_id {
            payload = payload.text("chatId", chat_id);
        }
        if let Some(file) = self.file {
            payload = payload.file(file);
        }
        payload
    }
}

/// One page of `GET /chat/{id}/messages`, oldest first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagesHistory {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image_generation: Option<bool>,
    #[serde(default)]
    pub has_more: bool,
}

/// Body of `PATCH /chat/{id}/update-ai-features`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiFeatures {
    pub is_web_search: bool,
    pub is_image_generation: bool,
}

/// Entry of `GET /chat`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Response of `POST /chat/transcribe`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TranscriptionUsage>,
}
