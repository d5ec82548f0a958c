//! # Backward Pagination
//!
//! Older messages are fetched when the viewport nears the top of the list.
//! After a page is prepended the viewport is moved down by the height the
//! new messages added, so the message the user was looking at stays put.
//!
//! ```text
//! before:  scroll_top=10, scroll_height=1000
//! after:   scroll_height=1600  →  scroll_top = 1600 - 1000 = 600
//! ```

use crate::core::state::Session;

/// Distance from the top (in scroll units) that triggers a fetch.
pub const NEAR_TOP_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
}

pub fn should_load_older(session: &Session, metrics: ScrollMetrics) -> bool {
    metrics.scroll_top <= NEAR_TOP_THRESHOLD
        && session.has_more()
        && !session.is_loading_older()
        && !session.messages().is_empty()
}

/// Content height captured right before a page is requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub previous_height: f64,
}

impl ScrollAnchor {
    pub fn capture(metrics: ScrollMetrics) -> Self {
        Self {
            previous_height: metrics.scroll_height,
        }
    }

    /// Scroll offset that keeps the previously visible content in place.
    pub fn restored_offset(&self, new_height: f64) -> f64 {
        new_height - self.previous_height
    }
}
