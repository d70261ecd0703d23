//! Event listener modules.
//!
//! - `client`: websocket transport and listen lifecycle.
//! - `proto`: wire messages shared with the event delivery service.
//! - `dispatch`: frame decoding, acknowledgments, and handler callbacks.

/// Websocket connection and listen lifecycle.
pub mod client;
/// Dispatch engine and handler trait.
pub mod dispatch;
/// Wire messages.
pub mod proto;

#[cfg(test)]
pub(crate) mod testutil;
