//! # Core Session Logic
//!
//! The chat session engine. The state and reducer know nothing about HTTP;
//! the session driver connects them to a [`ChatBackend`](crate::api::ChatBackend).
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │     state + action      │
//!                    │  update(session, a)     │
//!                    │  No I/O. Pure.          │
//!                    └───────────┬─────────────┘
//!                                │ Effect
//!                    ┌───────────▼─────────────┐
//!                    │   session (ChatSession) │
//!                    │  single writer, tasks   │
//!                    └─────┬─────────────┬─────┘
//!                          ▼             ▼
//!                  orchestrator     pagination fetch
//!                  (one turn)       (older pages)
//! ```
//!
//! ## Modules
//!
//! - [`state`]: `Session`, `SessionOps` and the read projections
//! - [`action`]: `Action`, `Effect` and the `update()` reducer
//! - [`message`]: conversation messages
//! - [`files`]: attachment bytes, kept outside the state
//! - [`pagination`]: near-top trigger and scroll anchoring
//! - [`orchestrator`]: the task that drives one turn
//! - [`session`]: `ChatSession`, which owns the state and runs the tasks
//! - [`config`]: settings and their override hierarchy

pub mod action;
pub mod config;
pub mod files;
pub mod message;
pub mod orchestrator;
pub mod pagination;
pub mod session;
pub mod state;

pub use action::{Action, Effect, update};
pub use session::{ChatSession, NoopHooks, SessionHooks};
pub use state::{Session, SessionOps};
