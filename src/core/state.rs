//! # Session State
//!
//! Everything one open conversation knows about itself.
//!
//! ```text
//! Session
//! ├── messages: Vec<Message>          // oldest first
//! ├── ops: SessionOps                 // model, sampling, feature toggles, pending file
//! ├── conversation_id: Option<String> // None until the first `done` names it
//! ├── active_turn: Option<ActiveTurn> // the in-flight turn, if any
//! ├── failed: Option<String>          // reason of the last failed turn
//! ├── is_transcribing: bool
//! ├── pagination: PaginationState     // has_more, is_loading_older
//! └── epoch: u64                      // bumped whenever the conversation changes
//! ```
//!
//! State changes only happen through `update(session, action)` in action.rs.
//! The getters below are read-only projections.

use std::fmt;

use crate::core::files::FileId;
use crate::core::message::Message;

pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-conversation request configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOps {
    pub model: String,
    pub model_developer: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub is_image_generation: bool,
    pub is_web_search: bool,
    pub prompt_id: Option<String>,
    /// Attachment queued for the next message.
    pub pending_file: Option<FileId>,
}

impl Default for SessionOps {
    fn default() -> Self {
        Self {
            model: String::new(),
            model_developer: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            is_image_generation: false,
            is_web_search: false,
            prompt_id: None,
            pending_file: None,
        }
    }
}

impl SessionOps {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, patch: OpsPatch) {
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(developer) = patch.model_developer {
            self.model_developer = developer;
        }
        if let Some(max_tokens) = patch.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = temperature;
        }
        if let Some(flag) = patch.is_image_generation {
            self.is_image_generation = flag;
        }
        if let Some(flag) = patch.is_web_search {
            self.is_web_search = flag;
        }
        if let Some(prompt_id) = patch.prompt_id {
            self.prompt_id = prompt_id;
        }
    }
}

/// Partial update of [`SessionOps`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpsPatch {
    pub model: Option<String>,
    pub model_developer: Option<Option<String>>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub is_image_generation: Option<bool>,
    pub is_web_search: Option<bool>,
    pub prompt_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(pub(crate) u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    /// Request issued, no event yet.
    Sending,
    /// At least one delta applied.
    Streaming,
    /// Terminal event applied, waiting for the turn task to end.
    Finalizing,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ActiveTurn {
    pub id: TurnId,
    pub phase: TurnPhase,
    /// The last message is this turn's assistant message and may be extended.
    pub assistant_open: bool,
    /// A delta already supplied an image, so the one in `done` is ignored.
    pub image_from_delta: bool,
    /// Attachment to release when the turn ends.
    pub file: Option<FileId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationState {
    pub has_more: bool,
    pub is_loading_older: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) messages: Vec<Message>,
    pub(crate) ops: SessionOps,
    /// What `Reset` restores.
    pub(crate) defaults: SessionOps,
    pub(crate) conversation_id: Option<String>,
    pub(crate) active_turn: Option<ActiveTurn>,
    pub(crate) failed: Option<String>,
    pub(crate) is_transcribing: bool,
    pub(crate) pagination: PaginationState,
    pub(crate) epoch: u64,
    pub(crate) next_turn: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOps::default())
    }
}

impl Session {
    pub fn new(defaults: SessionOps) -> Self {
        Self {
            messages: Vec::new(),
            ops: defaults.clone(),
            defaults,
            conversation_id: None,
            active_turn: None,
            failed: None,
            is_transcribing: false,
            pagination: PaginationState::default(),
            epoch: 0,
            next_turn: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn ops(&self) -> &SessionOps {
        &self.ops
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_sending(&self) -> bool {
        self.active_turn.is_some()
    }

    pub fn is_transcribing(&self) -> bool {
        self.is_transcribing
    }

    pub fn phase(&self) -> TurnPhase {
        self.active_turn
            .as_ref()
            .map(|turn| turn.phase)
            .unwrap_or_default()
    }

    pub fn active_turn_id(&self) -> Option<TurnId> {
        self.active_turn.as_ref().map(|turn| turn.id)
    }

    pub fn has_more(&self) -> bool {
        self.pagination.has_more
    }

    pub fn is_loading_older(&self) -> bool {
        self.pagination.is_loading_older
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Id of the oldest loaded message that the server knows about.
    pub fn oldest_message_id(&self) -> Option<&str> {
        self.messages.iter().find_map(|message| message.id.as_deref())
    }

    /// Reason of the last turn's failure, while it can be retried.
    pub fn failed_turn(&self) -> Option<&str> {
        self.failed.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
