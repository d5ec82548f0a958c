//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream;

use crate::api::{
    AiFeatures, ApiError, ChatBackend, ChatSummary, MessagesHistory, SendMessageRequest,
    Transcription,
};
use crate::core::message::{Message, Role};
use crate::core::pagination::ScrollAnchor;
use crate::core::session::SessionHooks;
use crate::transport::{DoneEvent, EventStream, FilePart, StreamEvent, TransportError};

pub type EventItem = Result<StreamEvent, TransportError>;

enum Script {
    Events(Vec<EventItem>),
    Live(mpsc::UnboundedReceiver<EventItem>),
}

/// A backend that plays back scripted turns and history pages and records
/// what it was asked for.
#[derive(Default)]
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<SendMessageRequest>>,
    pages: Mutex<VecDeque<Result<MessagesHistory, ApiError>>>,
    page_requests: Mutex<Vec<(String, Option<String>)>>,
    settings: Mutex<Vec<SettingsCall>>,
}

/// A settings save the session asked the backend for.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsCall {
    MaxTokens(String, u32),
    Temperature(String, f32),
    Features(String, AiFeatures),
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next turn replays these events, then the stream ends.
    pub fn push_turn(&self, events: Vec<EventItem>) {
        self.turns.lock().unwrap().push_back(Script::Events(events));
    }

    /// Next turn stays open until the returned sender sends or is dropped.
    pub fn push_live_turn(&self) -> mpsc::UnboundedSender<EventItem> {
        let (tx, rx) = mpsc::unbounded();
        self.turns.lock().unwrap().push_back(Script::Live(rx));
        tx
    }

    pub fn push_page(&self, page: Result<MessagesHistory, ApiError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn requests(&self) -> Vec<SendMessageRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `(chat_id, before_message_id)` of every history request.
    pub fn page_requests(&self) -> Vec<(String, Option<String>)> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn settings_calls(&self) -> Vec<SettingsCall> {
        self.settings.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn send_message(&self, request: SendMessageRequest) -> EventStream {
        self.requests.lock().unwrap().push(request);
        match self.turns.lock().unwrap().pop_front() {
            Some(Script::Events(events)) => EventStream::from_stream(stream::iter(events)),
            Some(Script::Live(rx)) => EventStream::from_stream(rx),
            None => EventStream::from_stream(stream::empty()),
        }
    }

    async fn load_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<MessagesHistory, ApiError> {
        self.page_requests
            .lock()
            .unwrap()
            .push((chat_id.to_string(), before.map(str::to_string)));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(MessagesHistory::default()))
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        Ok(Vec::new())
    }

    async fn transcribe(&self, audio: FilePart) -> Result<Transcription, ApiError> {
        Ok(Transcription {
            text: format!("transcript of {}", audio.file_name),
            usage: None,
        })
    }

    async fn update_max_tokens(&self, chat_id: &str, max_tokens: u32) -> Result<(), ApiError> {
        self.settings
            .lock()
            .unwrap()
            .push(SettingsCall::MaxTokens(chat_id.to_string(), max_tokens));
        Ok(())
    }

    async fn update_temperature(&self, chat_id: &str, temperature: f32) -> Result<(), ApiError> {
        self.settings
            .lock()
            .unwrap()
            .push(SettingsCall::Temperature(chat_id.to_string(), temperature));
        Ok(())
    }

    async fn update_ai_features(
        &self,
        chat_id: &str,
        features: AiFeatures,
    ) -> Result<(), ApiError> {
        self.settings
            .lock()
            .unwrap()
            .push(SettingsCall::Features(chat_id.to_string(), features));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    Navigate(String),
    Created(ChatSummary),
    RestoreScroll(ScrollAnchor, usize),
}

/// Hooks that remember every call.
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
}

impl RecordingHooks {
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl SessionHooks for RecordingHooks {
    fn navigate_to_conversation(&self, id: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::Navigate(id.to_string()));
    }

    fn conversation_created(&self, chat: &ChatSummary) {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::Created(chat.clone()));
    }

    fn restore_scroll(&self, anchor: ScrollAnchor, prepended: usize) {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::RestoreScroll(anchor, prepended));
    }
}

pub fn delta(text: &str) -> EventItem {
    Ok(StreamEvent::Delta {
        text: text.to_string(),
        image_url: None,
    })
}

pub fn done(chat_id: &str) -> EventItem {
    Ok(StreamEvent::Done(DoneEvent {
        chat_id: chat_id.to_string(),
        title: "New chat".to_string(),
        input_tokens: Some(3),
        output_tokens: Some(8),
        image_url: None,
    }))
}

pub fn send_request(message: &str) -> SendMessageRequest {
    SendMessageRequest {
        message: message.to_string(),
        model: "test-model".to_string(),
        model_developer: None,
        max_tokens: 2048,
        temperature: 0.7,
        is_image_generation: false,
        is_web_search: false,
        prompt_id: None,
        chat_id: None,
        file: None,
    }
}

/// A message as the server returns it in history.
pub fn stored_message(id: &str, role: Role) -> Message {
    let mut message = match role {
        Role::User => Message::user(format!("user {id}"), None),
        Role::Assistant => Message::assistant(format!("assistant {id}")),
    };
    message.id = Some(id.to_string());
    message.created_at = None;
    message
}
