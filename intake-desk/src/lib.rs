//! # Intake Desk
//!
//! One admin session against the intake hub:
//! - Session cache reducer (optimistic edits, pending slots, reconnect state)
//! - Selection and bulk dispatch
//! - Keyboard command decoder and the desk controller that executes commands
//! - HTTP backend and SSE change feed for a remote hub

pub mod cache;
pub mod desk;
pub mod feed;
pub mod http;
pub mod keyboard;
pub mod selection;

pub use cache::{CacheAction, ConnectionState, MutationToken, SessionCache};
pub use desk::{Desk, DispatchOutcome};
pub use feed::run_feed;
pub use http::HttpBackend;
pub use keyboard::{decode, Command, Key, KeyInput};
pub use selection::Selection;
