//! Huddle core session and media lifecycle.
//!
//! Drives an abstract real-time media SDK: connects sessions with cached
//! tokens, owns the single local publisher and the single remote subscriber,
//! and rotates input devices. The SDK itself sits behind the traits in
//! [`provider`]; backends live in their own crates.

pub mod api;
pub mod connection;
pub mod coordinator;
pub mod devices;
pub mod errors;
pub mod events;
pub mod provider;
pub mod publisher;
pub mod registry;
pub mod settings;
pub mod subscriber;
pub mod tokens;

#[cfg(test)]
mod testing;

pub use coordinator::MediaCoordinator;
pub use errors::HuddleError;
pub use events::{ConnectionState, HuddleEvent, HuddleEventListener};
pub use provider::{MediaKind, RenderTarget, RtcProvider};
pub use settings::Settings;
pub use subscriber::ResolutionQuality;
pub use tokens::Role;
