//! Capability contract of the real-time communication SDK.
//!
//! The coordinator never talks to a transport directly. Everything it needs
//! from the SDK (sessions, local capture, remote subscriptions, device
//! enumeration and lifecycle events) goes through the traits below, so a
//! backend can be swapped without touching the lifecycle logic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Error reported by the SDK, in the SDK's own name/message shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct ProviderError {
    pub name: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enumerable input source. Owned by the platform, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

/// A remote stream announced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: String,
    pub connection_id: String,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Opaque identifier of the surface a stream is rendered into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTarget(pub String);

impl RenderTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    Contain,
    Cover,
}

/// Parameters for creating a local capture object.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// `None` means the platform default device.
    pub audio_source: Option<String>,
    pub video_source: Option<String>,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub audio_sample_rate: u32,
    pub stereo: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    pub target: Option<RenderTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeSettings {
    pub fit_mode: FitMode,
    pub show_controls: bool,
}

/// Lifecycle events a session reports after creation.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StreamCreated(StreamInfo),
    Reconnecting,
    Reconnected,
    Disconnected { reason: String },
}

/// Lifecycle events of a single remote subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    Connected,
    Disconnected { reason: String },
    Destroyed { reason: String },
}

/// A freshly initialized session plus the receiving end of its event feed.
pub struct SessionLink {
    pub session: Arc<dyn RtcSession>,
    pub events: UnboundedReceiver<SessionEvent>,
}

/// A freshly created subscription plus its event feed.
pub struct SubscriptionLink {
    pub subscriber: Arc<dyn RtcSubscriber>,
    pub events: UnboundedReceiver<SubscriberEvent>,
}

/// Entry point of an SDK backend.
#[async_trait]
pub trait RtcProvider: Send + Sync {
    /// Whether this platform can run the SDK transport at all.
    fn check_capability(&self) -> bool;

    /// Create the SDK-side object for a session. Does not connect.
    fn init_session(&self, session_id: &str) -> SessionLink;

    /// Enumerate every input device the platform exposes, of any kind.
    async fn enumerate_devices(&self) -> Result<Vec<Device>, ProviderError>;

    async fn create_publisher(
        &self,
        settings: &CaptureSettings,
    ) -> Result<Arc<dyn RtcPublisher>, ProviderError>;
}

#[async_trait]
pub trait RtcSession: Send + Sync {
    async fn connect(&self, token: &str) -> Result<(), ProviderError>;

    /// Leave the session. A session that was connected reports exactly one
    /// `Disconnected` event for it.
    async fn disconnect(&self);

    async fn publish(&self, publisher: Arc<dyn RtcPublisher>) -> Result<(), ProviderError>;

    async fn unpublish(&self, publisher: Arc<dyn RtcPublisher>);

    async fn subscribe(
        &self,
        stream: &StreamInfo,
        target: &RenderTarget,
        settings: &SubscribeSettings,
    ) -> Result<SubscriptionLink, ProviderError>;

    async fn unsubscribe(&self, subscriber: Arc<dyn RtcSubscriber>);
}

#[async_trait]
pub trait RtcPublisher: Send + Sync {
    fn id(&self) -> String;

    async fn set_audio_source(&self, device_id: &str) -> Result<(), ProviderError>;

    async fn set_video_source(&self, device_id: &str) -> Result<(), ProviderError>;

    /// Release the capture devices. The object is unusable afterwards.
    async fn destroy(&self);
}

pub trait RtcSubscriber: Send + Sync {
    fn id(&self) -> String;

    fn stream_id(&self) -> String;

    fn set_preferred_resolution(&self, resolution: Resolution);
}
