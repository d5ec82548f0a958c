//! streamchat library exports for the binary and integration tests

pub mod api;
pub mod core;
pub mod transport;

#[cfg(test)]
pub mod test_support;
