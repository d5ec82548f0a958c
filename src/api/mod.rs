//! # Chat Backend API
//!
//! - [`client`]: authenticated JSON client for the plain endpoints
//! - [`types`]: request/response bodies
//! - [`backend`]: the `ChatBackend` seam and its HTTP implementation

pub mod backend;
pub mod client;
pub mod types;

pub use backend::{ChatApi, ChatBackend};
pub use client::{ApiClient, ApiError};
pub use types::{AiFeatures, ChatSummary, MessagesHistory, SendMessageRequest, Transcription};
