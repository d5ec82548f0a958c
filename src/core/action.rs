//! # Actions
//!
//! Everything that can happen to a chat session becomes an `Action`.
//! User sends a message? That's `Action::Submit`.
//! A line arrives on the stream? That's `Action::StreamDelta`.
//!
//! `update()` applies an action to the session and returns the `Effect` the
//! driver has to perform. No I/O happens here.
//!
//! ```text
//! Session + Action  →  update()  →  Session' + Effect
//! ```
//!
//! Stream actions carry the `TurnId` of the turn that produced them, and
//! history/pagination results carry the session epoch they were requested
//! in. Anything addressed to a turn or epoch that is no longer current is
//! dropped, so a late event can never touch a reset conversation.

use log::{debug, info, warn};

use crate::api::types::{AiFeatures, MessagesHistory};
use crate::core::files::FileId;
use crate::core::message::{FileRef, Message, MessageStatus, Role};
use crate::core::state::{ActiveTurn, OpsPatch, PaginationState, Session, TurnId, TurnPhase};
use crate::transport::DoneEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Back to an empty "new conversation".
    Reset,
    SetOps(OpsPatch),
    /// Enter an existing conversation. Switching to a different id clears
    /// the loaded messages.
    SetConversationId(Option<String>),
    HistoryLoaded {
        epoch: u64,
        history: MessagesHistory,
    },
    SetPendingFile(Option<FileId>),
    Submit {
        text: String,
        attachment: Option<FileRef>,
        /// Conversation the caller believes it is in, adopted if the session has none.
        conversation_id: Option<String>,
    },
    StreamDelta {
        turn: TurnId,
        text: String,
        image_url: Option<String>,
    },
    StreamDone {
        turn: TurnId,
        done: DoneEvent,
    },
    StreamFailed {
        turn: TurnId,
        reason: String,
    },
    /// The turn task ended, for whatever reason. Sent exactly once per turn.
    TurnFinished {
        turn: TurnId,
    },
    RetryFailedTurn,
    BeginLoadOlder,
    OlderLoaded {
        epoch: u64,
        messages: Vec<Message>,
        has_more: bool,
    },
    LoadOlderFailed {
        epoch: u64,
    },
    SetTranscribing(bool),
}

/// What the driver must do after an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Open the stream for this turn.
    StartTurn { turn: TurnId, request: TurnRequest },
    /// The first `done` of a new conversation named it.
    ConversationCreated { id: String, title: String },
    /// The attachment's bytes are no longer needed.
    ReleaseFile(FileId),
    /// Fetch the page before `before_message_id`.
    FetchOlder {
        conversation_id: String,
        before_message_id: String,
        epoch: u64,
    },
    /// Older messages were put at the head of the list.
    OlderPrepended { count: usize },
    /// Save changed conversation settings on the server.
    SyncOps {
        conversation_id: String,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        features: Option<AiFeatures>,
    },
}

/// The request of one turn, minus the attachment bytes (looked up by id).
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub message: String,
    pub model: String,
    pub model_developer: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub is_image_generation: bool,
    pub is_web_search: bool,
    pub prompt_id: Option<String>,
    pub chat_id: Option<String>,
    pub file: Option<FileId>,
}

impl TurnRequest {
    fn from_session(session: &Session, message: String, file: Option<FileId>) -> Self {
        let ops = &session.ops;
        Self {
            message,
            model: ops.model.clone(),
            model_developer: ops.model_developer.clone(),
            max_tokens: ops.max_tokens,
            temperature: ops.temperature,
            is_image_generation: ops.is_image_generation,
            is_web_search: ops.is_web_search,
            prompt_id: ops.prompt_id.clone(),
            chat_id: session.conversation_id.clone(),
            file,
        }
    }
}

pub fn update(session: &mut Session, action: Action) -> Effect {
    match action {
        Action::Reset => {
            debug!("Resetting session (epoch {})", session.epoch);
            let defaults = session.defaults.clone();
            let epoch = session.epoch + 1;
            let next_turn = session.next_turn;
            *session = Session::new(defaults);
            session.epoch = epoch;
            session.next_turn = next_turn;
            Effect::None
        }

        Action::SetOps(patch) => {
            let max_tokens = patch.max_tokens;
            let temperature = patch.temperature;
            let features_changed =
                patch.is_web_search.is_some() || patch.is_image_generation.is_some();
            session.ops.apply(patch);

            // Only settings the server stores per conversation are synced.
            match &session.conversation_id {
                Some(id) if max_tokens.is_some() || temperature.is_some() || features_changed => {
                    Effect::SyncOps {
                        conversation_id: id.clone(),
                        max_tokens,
                        temperature,
                        features: features_changed.then(|| AiFeatures {
                            is_web_search: session.ops.is_web_search,
                            is_image_generation: session.ops.is_image_generation,
                        }),
                    }
                }
                _ => Effect::None,
            }
        }

        Action::SetConversationId(id) => {
            if session.conversation_id == id {
                return Effect::None;
            }
            info!("Entering conversation {:?}", id);
            session.conversation_id = id;
            session.messages.clear();
            session.active_turn = None;
            session.failed = None;
            session.ops.pending_file = None;
            session.pagination = PaginationState::default();
            session.epoch += 1;
            Effect::None
        }

        Action::HistoryLoaded { epoch, history } => {
            if epoch != session.epoch {
                debug!("Dropping stale history (epoch {} != {})", epoch, session.epoch);
                return Effect::None;
            }
            debug!("History loaded: {} messages", history.messages.len());
            session.messages = history.messages;
            session.ops.apply(OpsPatch {
                max_tokens: history.max_tokens,
                temperature: history.temperature,
                is_web_search: history.is_web_search,
                is_image_generation: history.is_image_generation,
                ..OpsPatch::default()
            });
            session.pagination = PaginationState {
                has_more: history.has_more,
                is_loading_older: false,
            };
            Effect::None
        }

        Action::SetPendingFile(file) => {
            session.ops.pending_file = file;
            Effect::None
        }

        Action::Submit {
            text,
            attachment,
            conversation_id,
        } => {
            if session.active_turn.is_some() {
                debug!("Turn already in flight, ignoring submit");
                return Effect::None;
            }
            if text.trim().is_empty() {
                return Effect::None;
            }
            if session.conversation_id.is_none() && conversation_id.is_some() {
                session.conversation_id = conversation_id;
            }

            let file = match &attachment {
                Some(FileRef::Local { id, .. }) => Some(*id),
                _ => None,
            };
            session.failed = None;
            session.ops.pending_file = None;
            session.messages.push(Message::user(text.clone(), attachment));

            let request = TurnRequest::from_session(session, text, file);
            let turn = begin_turn(session, file);
            Effect::StartTurn { turn, request }
        }

        Action::StreamDelta {
            turn,
            text,
            image_url,
        } => {
            let Some(active) = streaming_turn(&mut session.active_turn, turn) else {
                return Effect::None;
            };

            if active.assistant_open
                && let Some(last) = session.messages.last_mut()
            {
                last.content.push_str(&text);
            } else {
                session.messages.push(Message::assistant(text));
                active.assistant_open = true;
            }
            if let Some(url) = image_url
                && let Some(last) = session.messages.last_mut()
            {
                last.image_url = Some(url);
                active.image_from_delta = true;
            }
            active.phase = TurnPhase::Streaming;
            Effect::None
        }

        Action::StreamDone { turn, done } => {
            let Some(active) = streaming_turn(&mut session.active_turn, turn) else {
                return Effect::None;
            };

            if let Some(image_url) = done.image_url.filter(|_| !active.image_from_delta) {
                if !active.assistant_open {
                    session.messages.push(Message::assistant(String::new()));
                    active.assistant_open = true;
                }
                if let Some(last) = session.messages.last_mut() {
                    last.image_url = Some(image_url);
                }
            }

            if let Some(user) = session
                .messages
                .iter_mut()
                .rev()
                .find(|message| message.role == Role::User)
                && done.input_tokens.is_some()
            {
                user.input_tokens = done.input_tokens;
            }
            if active.assistant_open
                && let Some(assistant) = session.messages.last_mut()
            {
                assistant.output_tokens = done.output_tokens;
            }

            active.assistant_open = false;
            active.phase = TurnPhase::Finalizing;

            match &session.conversation_id {
                None => {
                    info!("Conversation created: {} ({})", done.chat_id, done.title);
                    session.conversation_id = Some(done.chat_id.clone());
                    Effect::ConversationCreated {
                        id: done.chat_id,
                        title: done.title,
                    }
                }
                Some(current) if *current != done.chat_id => {
                    warn!(
                        "Server answered for conversation {} while in {}, keeping {}",
                        done.chat_id, current, current
                    );
                    Effect::None
                }
                Some(_) => Effect::None,
            }
        }

        Action::StreamFailed { turn, reason } => {
            let Some(active) = streaming_turn(&mut session.active_turn, turn) else {
                return Effect::None;
            };
            warn!("Turn {} failed: {}", turn, reason);

            let target = if active.assistant_open {
                session.messages.last_mut()
            } else {
                session
                    .messages
                    .iter_mut()
                    .rev()
                    .find(|message| message.role == Role::User)
            };
            if let Some(message) = target {
                message.status = MessageStatus::Failed {
                    reason: reason.clone(),
                };
            }

            session.failed = Some(reason);
            active.assistant_open = false;
            active.phase = TurnPhase::Finalizing;
            Effect::None
        }

        Action::TurnFinished { turn } => {
            match &session.active_turn {
                Some(active) if active.id == turn => {}
                _ => {
                    debug!("Ignoring finish of stale {}", turn);
                    return Effect::None;
                }
            }
            let Some(finished) = session.active_turn.take() else {
                return Effect::None;
            };
            if finished.phase != TurnPhase::Finalizing {
                debug!("{} ended without a terminal event", turn);
            }
            debug!("{} finished", turn);
            match finished.file {
                Some(id) => Effect::ReleaseFile(id),
                None => Effect::None,
            }
        }

        Action::RetryFailedTurn => {
            if session.active_turn.is_some() || session.failed.is_none() {
                return Effect::None;
            }
            let Some(user_index) = session
                .messages
                .iter()
                .rposition(|message| message.role == Role::User)
            else {
                return Effect::None;
            };

            if session
                .messages
                .last()
                .is_some_and(|last| last.role == Role::Assistant && last.is_failed())
            {
                session.messages.pop();
            }

            let user = &mut session.messages[user_index];
            user.status = MessageStatus::Complete;
            let text = user.content.clone();
            session.failed = None;
            info!("Retrying failed turn");

            let request = TurnRequest::from_session(session, text, None);
            let turn = begin_turn(session, None);
            Effect::StartTurn { turn, request }
        }

        Action::BeginLoadOlder => {
            if session.pagination.is_loading_older || !session.pagination.has_more {
                return Effect::None;
            }
            let (Some(conversation_id), Some(before)) =
                (session.conversation_id(), session.oldest_message_id())
            else {
                return Effect::None;
            };
            let effect = Effect::FetchOlder {
                conversation_id: conversation_id.to_string(),
                before_message_id: before.to_string(),
                epoch: session.epoch,
            };
            session.pagination.is_loading_older = true;
            effect
        }

        Action::OlderLoaded {
            epoch,
            messages,
            has_more,
        } => {
            if epoch != session.epoch {
                debug!("Dropping stale page (epoch {} != {})", epoch, session.epoch);
                return Effect::None;
            }
            let count = messages.len();
            session.messages.splice(0..0, messages);
            session.pagination = PaginationState {
                has_more,
                is_loading_older: false,
            };
            debug!("Prepended {} older messages (has_more={})", count, has_more);
            Effect::OlderPrepended { count }
        }

        Action::LoadOlderFailed { epoch } => {
            if epoch == session.epoch {
                session.pagination.is_loading_older = false;
            }
            Effect::None
        }

        Action::SetTranscribing(flag) => {
            session.is_transcribing = flag;
            Effect::None
        }
    }
}

fn begin_turn(session: &mut Session, file: Option<FileId>) -> TurnId {
    session.next_turn += 1;
    let id = TurnId(session.next_turn);
    session.active_turn = Some(ActiveTurn {
        id,
        phase: TurnPhase::Sending,
        assistant_open: false,
        image_from_delta: false,
        file,
    });
    debug!("{} started", id);
    id
}

/// The active turn, if `turn` is it and it has not seen a terminal event yet.
fn streaming_turn(active: &mut Option<ActiveTurn>, turn: TurnId) -> Option<&mut ActiveTurn> {
    match active {
        Some(active) if active.id == turn && active.phase != TurnPhase::Finalizing => Some(active),
        _ => {
            debug!("Ignoring event for stale {}", turn);
            None
        }
    }
}
