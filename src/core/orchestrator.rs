//! # Turn Orchestration
//!
//! One turn = one streamed request. The task below forwards every stream
//! event to the session as an [`Action`], in the order the server sent them,
//! and stops at the first terminal event.
//!
//! ```text
//! ChatBackend::send_message ──► EventStream
//!     Delta  ─► Action::StreamDelta
//!     Done   ─► Action::StreamDone    (stop)
//!     Error  ─► Action::StreamFailed  (stop)
//!     Err(e) ─► Action::StreamFailed  (stop)
//! task ends ─► Action::TurnFinished  (always, exactly once)
//! ```

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::api::{ChatBackend, SendMessageRequest};
use crate::core::action::Action;
use crate::core::state::TurnId;
use crate::transport::StreamEvent;

/// Sends `TurnFinished` when dropped, so the sending flag is cleared even if
/// the task is aborted mid-stream or before it ever ran.
struct TurnGuard {
    turn: TurnId,
    tx: UnboundedSender<Action>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        // The session may already be gone.
        let _ = self.tx.send(Action::TurnFinished { turn: self.turn });
    }
}

pub fn spawn_turn(
    backend: Arc<dyn ChatBackend>,
    turn: TurnId,
    request: SendMessageRequest,
    tx: UnboundedSender<Action>,
) -> JoinHandle<()> {
    let guard = TurnGuard {
        turn,
        tx: tx.clone(),
    };
    tokio::spawn(async move {
        forward_events(backend.as_ref(), turn, request, &tx).await;
        drop(guard);
    })
}

/// Runs one turn to completion on the current task.
pub async fn run_turn(
    backend: Arc<dyn ChatBackend>,
    turn: TurnId,
    request: SendMessageRequest,
    tx: UnboundedSender<Action>,
) {
    let _guard = TurnGuard {
        turn,
        tx: tx.clone(),
    };
    forward_events(backend.as_ref(), turn, request, &tx).await;
}

async fn forward_events(
    backend: &dyn ChatBackend,
    turn: TurnId,
    request: SendMessageRequest,
    tx: &UnboundedSender<Action>,
) {
    let mut events = backend.send_message(request);
    let mut forwarded = 0usize;

    while let Some(item) = events.next().await {
        let (action, terminal) = match item {
            Ok(StreamEvent::Delta { text, image_url }) => (
                Action::StreamDelta {
                    turn,
                    text,
                    image_url,
                },
                false,
            ),
            Ok(StreamEvent::Done(done)) => (Action::StreamDone { turn, done }, true),
            Ok(StreamEvent::Error { reason }) => (Action::StreamFailed { turn, reason }, true),
            Err(e) => (
                Action::StreamFailed {
                    turn,
                    reason: e.to_string(),
                },
                true,
            ),
        };

        if tx.send(action).is_err() {
            debug!("Session gone, abandoning {}", turn);
            return;
        }
        forwarded += 1;
        if terminal {
            break;
        }
    }

    info!("{} stream closed after {} events", turn, forwarded);
}
