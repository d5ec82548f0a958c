//! # Chat Session
//!
//! `ChatSession` is the single writer of a [`Session`]. It applies actions
//! through the reducer and performs the effects they return: spawning turn
//! and pagination tasks, releasing attachments, calling the host's hooks.
//!
//! ```text
//!   caller ──► handle_user_message / load_older / enter_conversation
//!                        │
//!                        ▼
//!                  update(session, action) ──► Effect ──► spawn / hooks
//!                        ▲
//!   tasks ──► mpsc<Action> ──► process_next()
//! ```
//!
//! Tasks never touch the state directly. They send actions back over the
//! channel, and the owner applies them in arrival order with
//! [`ChatSession::process_next`]. Dropping the session aborts every task.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::api::{ApiError, ChatBackend, ChatSummary, SendMessageRequest};
use crate::core::action::{Action, Effect, TurnRequest, update};
use crate::core::files::{Attachment, FileId, FileStore};
use crate::core::message::FileRef;
use crate::core::orchestrator::spawn_turn;
use crate::core::pagination::{ScrollAnchor, ScrollMetrics, should_load_older};
use crate::core::state::{OpsPatch, Session, SessionOps, TurnId};
use crate::transport::FilePart;

/// Host callbacks: navigation, conversation list and scroll restoration.
pub trait SessionHooks: Send + Sync {
    /// A new conversation got its server id; the host should show it.
    fn navigate_to_conversation(&self, _id: &str) {}

    /// Add the new conversation to the host's list.
    fn conversation_created(&self, _chat: &ChatSummary) {}

    /// A page was prepended. The host moves its viewport to
    /// `anchor.restored_offset(new_height)`.
    fn restore_scroll(&self, _anchor: ScrollAnchor, _prepended: usize) {}
}

pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

pub struct ChatSession {
    state: Session,
    backend: Arc<dyn ChatBackend>,
    hooks: Arc<dyn SessionHooks>,
    files: FileStore,
    tx: UnboundedSender<Action>,
    rx: UnboundedReceiver<Action>,
    turn_task: Option<JoinHandle<()>>,
    older_task: Option<JoinHandle<()>>,
    pending_anchor: Option<ScrollAnchor>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        hooks: Arc<dyn SessionHooks>,
        defaults: SessionOps,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Session::new(defaults),
            backend,
            hooks,
            files: FileStore::new(),
            tx,
            rx,
            turn_task: None,
            older_task: None,
            pending_anchor: None,
        }
    }

    pub fn state(&self) -> &Session {
        &self.state
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Changes request options. On an existing conversation, max tokens,
    /// temperature and the feature toggles are saved on the server too, so
    /// the next history load does not bring back the old values.
    pub async fn set_ops(&mut self, patch: OpsPatch) -> Result<(), ApiError> {
        let Effect::SyncOps {
            conversation_id,
            max_tokens,
            temperature,
            features,
        } = self.dispatch(Action::SetOps(patch))
        else {
            return Ok(());
        };

        let result = async {
            if let Some(max_tokens) = max_tokens {
                self.backend
                    .update_max_tokens(&conversation_id, max_tokens)
                    .await?;
            }
            if let Some(temperature) = temperature {
                self.backend
                    .update_temperature(&conversation_id, temperature)
                    .await?;
            }
            if let Some(features) = features {
                self.backend
                    .update_ai_features(&conversation_id, features)
                    .await?;
            }
            Ok::<(), ApiError>(())
        }
        .await;

        if let Err(e) = &result {
            warn!("Failed to save settings of {}: {}", conversation_id, e);
        }
        result
    }

    /// Queues an attachment for the next message, replacing any earlier one.
    pub fn attach_file(&mut self, attachment: Attachment) -> FileId {
        if let Some(previous) = self.state.ops().pending_file {
            self.files.remove(previous);
        }
        let id = self.files.store(attachment);
        self.dispatch(Action::SetPendingFile(Some(id)));
        id
    }

    pub fn detach_file(&mut self) {
        if let Some(id) = self.state.ops().pending_file {
            self.files.remove(id);
            self.dispatch(Action::SetPendingFile(None));
        }
    }

    /// Starts a turn. Returns false if the message was blank or a turn is
    /// already in flight.
    pub fn handle_user_message(&mut self, text: &str, conversation_id: Option<&str>) -> bool {
        let attachment = self.state.ops().pending_file.and_then(|id| {
            self.files.get(id).map(|file| FileRef::Local {
                id,
                name: file.name.clone(),
            })
        });

        let effect = self.dispatch(Action::Submit {
            text: text.to_string(),
            attachment,
            conversation_id: conversation_id.map(str::to_string),
        });
        matches!(effect, Effect::StartTurn { .. })
    }

    pub fn retry_failed_turn(&mut self) -> bool {
        matches!(
            self.dispatch(Action::RetryFailedTurn),
            Effect::StartTurn { .. }
        )
    }

    /// Stops the in-flight turn. The turn still finishes normally: the
    /// sending flag clears once the task reports back.
    pub fn cancel_turn(&mut self) {
        if let Some(task) = &self.turn_task {
            info!("Cancelling in-flight turn");
            task.abort();
        }
    }

    /// Starts a pagination fetch if the viewport is near the top and there
    /// is more to load.
    pub fn maybe_load_older(&mut self, metrics: ScrollMetrics) -> bool {
        should_load_older(&self.state, metrics) && self.load_older(metrics)
    }

    pub fn load_older(&mut self, metrics: ScrollMetrics) -> bool {
        let anchor = ScrollAnchor::capture(metrics);
        match self.dispatch(Action::BeginLoadOlder) {
            Effect::FetchOlder { .. } => {
                self.pending_anchor = Some(anchor);
                true
            }
            _ => false,
        }
    }

    /// Opens an existing conversation and loads its latest page.
    ///
    /// A conversation that is already shown with messages (the one a turn
    /// just created) is not reloaded.
    pub async fn enter_conversation(&mut self, id: &str) -> Result<(), ApiError> {
        if self.state.conversation_id() == Some(id) && !self.state.messages().is_empty() {
            debug!("Already showing conversation {}, skipping reload", id);
            return Ok(());
        }
        if self.state.conversation_id() != Some(id) {
            self.abort_tasks();
            self.files.clear();
            self.pending_anchor = None;
        }

        self.dispatch(Action::SetConversationId(Some(id.to_string())));
        let epoch = self.state.epoch();
        match self.backend.load_messages(id, None).await {
            Ok(history) => {
                self.dispatch(Action::HistoryLoaded { epoch, history });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load conversation {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Back to an empty conversation. In-flight work is abandoned.
    pub fn enter_new_conversation(&mut self) {
        self.abort_tasks();
        self.files.clear();
        self.pending_anchor = None;
        self.dispatch(Action::Reset);
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.backend.list_chats().await
    }

    /// Turns recorded audio into text for the next message.
    pub async fn transcribe(&mut self, audio: FilePart) -> Result<String, ApiError> {
        self.dispatch(Action::SetTranscribing(true));
        let result = self.backend.transcribe(audio).await;
        self.dispatch(Action::SetTranscribing(false));

        match result {
            Ok(transcription) => {
                debug!("Transcribed {} chars", transcription.text.len());
                Ok(transcription.text)
            }
            Err(e) => {
                warn!("Transcription failed: {}", e);
                Err(e)
            }
        }
    }

    /// True while a turn or a pagination fetch is outstanding.
    pub fn is_busy(&self) -> bool {
        self.state.is_sending() || self.state.is_loading_older()
    }

    /// Waits for the next action from a task and applies it.
    ///
    /// Cancel safe, so it can sit in a `tokio::select!` next to input handling.
    pub async fn process_next(&mut self) -> Effect {
        match self.rx.recv().await {
            Some(action) => self.dispatch(action),
            None => Effect::None,
        }
    }

    /// Applies task actions until no turn or fetch is outstanding.
    pub async fn run_until_idle(&mut self) {
        while self.is_busy() {
            self.process_next().await;
        }
    }

    fn dispatch(&mut self, action: Action) -> Effect {
        let effect = update(&mut self.state, action);
        self.perform(&effect);
        effect
    }

    fn perform(&mut self, effect: &Effect) {
        match effect {
            Effect::None => {}
            Effect::StartTurn { turn, request } => self.start_turn(*turn, request),
            Effect::ConversationCreated { id, title } => {
                self.hooks.navigate_to_conversation(id);
                self.hooks.conversation_created(&ChatSummary {
                    id: id.clone(),
                    title: title.clone(),
                    created_at: None,
                });
            }
            Effect::ReleaseFile(id) => {
                self.files.remove(*id);
            }
            Effect::FetchOlder {
                conversation_id,
                before_message_id,
                epoch,
            } => self.fetch_older(conversation_id.clone(), before_message_id.clone(), *epoch),
            Effect::OlderPrepended { count } => {
                if let Some(anchor) = self.pending_anchor.take() {
                    self.hooks.restore_scroll(anchor, *count);
                }
            }
            // Awaited by `set_ops`.
            Effect::SyncOps { .. } => {}
        }
    }

    fn start_turn(&mut self, turn: TurnId, request: &TurnRequest) {
        let file = request
            .file
            .and_then(|id| self.files.get(id))
            .map(|attachment| FilePart::from(attachment.clone()));

        let request = SendMessageRequest {
            message: request.message.clone(),
            model: request.model.clone(),
            model_developer: request.model_developer.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            is_image_generation: request.is_image_generation,
            is_web_search: request.is_web_search,
            prompt_id: request.prompt_id.clone(),
            chat_id: request.chat_id.clone(),
            file,
        };
        self.turn_task = Some(spawn_turn(
            self.backend.clone(),
            turn,
            request,
            self.tx.clone(),
        ));
    }

    fn fetch_older(&mut self, conversation_id: String, before: String, epoch: u64) {
        let backend = self.backend.clone();
        let tx = self.tx.clone();
        debug!("Loading messages before {} in {}", before, conversation_id);

        self.older_task = Some(tokio::spawn(async move {
            let action = match backend.load_messages(&conversation_id, Some(&before)).await {
                Ok(page) => Action::OlderLoaded {
                    epoch,
                    messages: page.messages,
                    has_more: page.has_more,
                },
                Err(e) => {
                    warn!("Failed to load older messages: {}", e);
                    Action::LoadOlderFailed { epoch }
                }
            };
            let _ = tx.send(action);
        }));
    }

    fn abort_tasks(&mut self) {
        for task in [self.turn_task.take(), self.older_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
