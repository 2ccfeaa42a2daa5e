//! LiveKit backend for huddle-core.
//!
//! Each session id names a LiveKit room on the configured media server.
//! Microphones are enumerated and captured through cpal, cameras through
//! V4L2. Cameras listed in the settings are offered as well.

pub mod audio;
pub mod camera;
pub mod publisher;
pub mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use huddle_core::HuddleError;
use huddle_core::provider::{
    CaptureSettings, Device, MediaKind, ProviderError, RtcProvider, RtcPublisher, SessionLink,
};
use huddle_core::settings::Settings;
use tokio::sync::mpsc;

pub use publisher::LiveKitPublisher;
pub use session::{LiveKitSession, LiveKitSubscriber};

/// Publishers created by a provider, by id. Sessions resolve the tracks to
/// publish through it.
pub type PublisherRegistry = Arc<Mutex<HashMap<String, Arc<LiveKitPublisher>>>>;

pub struct LiveKitProvider {
    url: String,
    cameras: Vec<Device>,
    publishers: PublisherRegistry,
}

impl LiveKitProvider {
    pub fn new(url: impl Into<String>, cameras: Vec<Device>) -> Self {
        Self {
            url: url.into(),
            cameras,
            publishers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, HuddleError> {
        let url = settings
            .media_server_url
            .clone()
            .ok_or_else(|| HuddleError::Config("media_server_url is not set".into()))?;
        let cameras = settings
            .video_devices
            .iter()
            .filter(|device| device.kind == MediaKind::Video)
            .cloned()
            .collect();
        Ok(Self::new(url, cameras))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Configured cameras followed by the ones V4L2 finds. Blocks.
    fn cameras(configured: &[Device]) -> Vec<Device> {
        let mut cameras = configured.to_vec();
        for found in camera::video_devices() {
            if !cameras.iter().any(|c| c.id == found.id) {
                cameras.push(found);
            }
        }
        cameras
    }

    /// Publisher created by this provider, for feeding camera frames.
    pub fn publisher(&self, publisher_id: &str) -> Option<Arc<LiveKitPublisher>> {
        self.publishers
            .lock()
            .ok()
            .and_then(|publishers| publishers.get(publisher_id).cloned())
    }
}

#[async_trait]
impl RtcProvider for LiveKitProvider {
    /// libwebrtc is linked in, so every native client can run a session.
    fn check_capability(&self) -> bool {
        true
    }

    fn init_session(&self, session_id: &str) -> SessionLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = LiveKitSession::new(session_id, &self.url, tx, self.publishers.clone());
        tracing::debug!("room {session_id} prepared on {}", self.url);
        SessionLink {
            session: Arc::new(session),
            events: rx,
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<Device>, ProviderError> {
        let configured = self.cameras.clone();
        tokio::task::spawn_blocking(move || {
            let mut devices = audio::input_devices()?;
            devices.extend(Self::cameras(&configured));
            Ok::<_, ProviderError>(devices)
        })
        .await
        .map_err(|e| ProviderError::new("DeviceEnumerationError", e.to_string()))?
    }

    async fn create_publisher(
        &self,
        settings: &CaptureSettings,
    ) -> Result<Arc<dyn RtcPublisher>, ProviderError> {
        let settings = settings.clone();
        let configured = self.cameras.clone();
        // cpal and V4L2 setup block
        let publisher = tokio::task::spawn_blocking(move || {
            LiveKitPublisher::create(&settings, Self::cameras(&configured))
        })
        .await
        .map_err(|e| ProviderError::new("PublisherError", e.to_string()))?;
        let publisher = Arc::new(publisher);

        let mut publishers = self
            .publishers
            .lock()
            .map_err(|_| ProviderError::new("PublisherError", "publisher registry poisoned"))?;
        publishers.retain(|_, existing| !existing.is_destroyed());
        publishers.insert(publisher.id(), publisher.clone());
        Ok(publisher)
    }
}
