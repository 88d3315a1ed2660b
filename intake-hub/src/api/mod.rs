//! HTTP surface of the hub

pub mod health;
pub mod identity;
pub mod presence;
pub mod sse;
pub mod submissions;

pub use health::health_routes;
pub use identity::AdminIdentity;
pub use presence::presence_routes;
pub use sse::event_stream;
pub use submissions::submission_routes;
