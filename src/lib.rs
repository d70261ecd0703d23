//! Rust SDK for streaming Stripe CLI events over a websocket session.
//!
//! The crate is organized by transport surface:
//! - `auth`: HTTP client that creates CLI sessions.
//! - `listener`: websocket transport, dispatch engine, and listen lifecycle.
//!
//! Typical flow: build a [`listener::client::ListenerConfig`] with an API key
//! and an event handler, then call
//! [`listener::client::Listener::listen_all`], which authorizes, dials the
//! session's websocket endpoint, and blocks while streaming events to the
//! handler. Each delivered event is acknowledged before the handler runs.

/// Session authorization client and identity headers.
pub mod auth;
/// Websocket listener: transport, wire messages, dispatch.
pub mod listener;
