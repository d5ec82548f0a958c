//! # Stream Transport
//!
//! Multipart POST whose chunked response body carries one JSON event per line.
//!
//! - [`event`]: the `StreamEvent` sum type and its wire format
//! - [`frame`]: byte chunks to complete lines (UTF-8 + newline reassembly)
//! - [`auth`]: bearer token, token rotation and logout on 401
//! - [`stream`]: `StreamTransport::open` and the cancellable `EventStream`

pub mod auth;
pub mod event;
pub mod frame;
pub mod stream;

pub use auth::{AuthSession, TokenStore};
pub use event::{DoneEvent, StreamEvent};
pub use stream::{
    CancelHandle, EventStream, FilePart, StreamOptions, StreamPayload, StreamTransport,
    TransportError,
};

use log::warn;

/// HTTP client shared by the transport and the REST client.
///
/// Keeps a cookie store so session cookies travel with every request.
pub fn build_http_client() -> reqwest::Client {
    match reqwest::Client::builder().cookie_store(true).build() {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build HTTP client with cookie store, using defaults: {}", e);
            reqwest::Client::new()
        }
    }
}
