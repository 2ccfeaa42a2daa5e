use std::sync::Arc;

use crate::api::{ApiClient, SessionProvisioner};
use crate::connection::ConnectionController;
use crate::devices::DeviceEnumerator;
use crate::errors::HuddleError;
use crate::events::{ConnectionState, EventEmitter, HuddleEventListener};
use crate::provider::{Device, MediaKind, RenderTarget, Resolution, RtcProvider, StreamInfo};
use crate::publisher::{PublisherController, PublisherDevices};
use crate::registry::SessionRegistry;
use crate::settings::Settings;
use crate::subscriber::{ResolutionQuality, SubscriberController};
use crate::tokens::{Role, TokenCache, TokenIssuer};

/// Session and media lifecycle of one client.
///
/// Construct one per application session and hand it to whoever drives the
/// UI. All mutating operations take `&mut self`, so two of them can never
/// interleave on the same coordinator.
pub struct MediaCoordinator {
    settings: Settings,
    emitter: EventEmitter,
    connection: ConnectionController,
    publisher: PublisherController,
    subscriber: SubscriberController,
    devices: DeviceEnumerator,
    provisioner: Option<Arc<dyn SessionProvisioner>>,
}

impl MediaCoordinator {
    pub fn new(
        provider: Arc<dyn RtcProvider>,
        issuer: Arc<dyn TokenIssuer>,
        settings: Settings,
    ) -> Self {
        let emitter = EventEmitter::new();
        let tokens = TokenCache::new(issuer, settings.token_lifetime());
        let registry = SessionRegistry::new(provider.clone(), emitter.clone());
        Self {
            connection: ConnectionController::new(tokens, registry),
            publisher: PublisherController::new(provider.clone(), emitter.clone()),
            subscriber: SubscriberController::new(emitter.clone()),
            devices: DeviceEnumerator::new(provider),
            provisioner: None,
            emitter,
            settings,
        }
    }

    /// Coordinator whose tokens and sessions come from the HTTP backend.
    pub fn with_api(provider: Arc<dyn RtcProvider>, settings: Settings) -> Result<Self, HuddleError> {
        let api = Arc::new(ApiClient::new(&settings)?);
        Ok(Self::new(provider, api.clone(), settings).with_provisioner(api))
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn SessionProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Register a listener for lifecycle events.
    pub fn add_listener(&self, listener: Arc<dyn HuddleEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn default_target(&self) -> RenderTarget {
        RenderTarget::new(self.settings.default_render_target.clone())
    }

    /// Ask the backend for a brand new session identifier.
    pub async fn create_session(&self) -> Result<String, HuddleError> {
        let provisioner = self
            .provisioner
            .as_ref()
            .ok_or_else(|| HuddleError::Config("no session provisioner configured".into()))?;
        provisioner.create_session().await
    }

    pub async fn connect(&mut self, session_id: &str, role: Role) -> Result<(), HuddleError> {
        self.connection.connect(session_id, role).await.map(|_| ())
    }

    /// Disconnect and destroy the live publisher. A live subscriber is kept.
    pub async fn disconnect(&mut self, session_id: &str) -> Result<(), HuddleError> {
        self.connection.disconnect(session_id).await?;
        self.publisher.destroy().await;
        Ok(())
    }

    /// Publish local camera and microphone into the session, previewing into
    /// `target` or the configured default target.
    ///
    /// Only an unsupported client is reported; provider-side failures are logged.
    pub async fn start_publish(
        &mut self,
        session_id: &str,
        target: Option<RenderTarget>,
    ) -> Result<(), HuddleError> {
        let handle = self.connection.session(session_id)?;
        let target = target.unwrap_or_else(|| self.default_target());
        self.publisher.start_publish(&handle, Some(target)).await;
        Ok(())
    }

    pub async fn stop_publish(&mut self, session_id: &str) -> Result<(), HuddleError> {
        let handle = self.connection.session(session_id)?;
        self.publisher.stop_publish(&handle).await;
        Ok(())
    }

    /// Subscribe to the latest announced stream, rendering into `target` or
    /// the configured default target.
    pub async fn start_subscribe(
        &mut self,
        session_id: &str,
        target: Option<RenderTarget>,
    ) -> Result<(), HuddleError> {
        let handle = self.connection.session(session_id)?;
        let target = target.unwrap_or_else(|| self.default_target());
        self.subscriber.start_subscribe(&handle, target).await;
        Ok(())
    }

    pub async fn stop_subscribe(&mut self, session_id: &str) {
        self.subscriber.stop_subscribe(session_id).await;
    }

    pub async fn switch_audio_input(&mut self) -> Result<Option<Device>, HuddleError> {
        self.publisher
            .switch_input(MediaKind::Audio, &mut self.devices)
            .await
    }

    pub async fn switch_video_input(&mut self) -> Result<Option<Device>, HuddleError> {
        self.publisher
            .switch_input(MediaKind::Video, &mut self.devices)
            .await
    }

    pub fn set_resolution_quality(&mut self, quality: ResolutionQuality) -> Option<Resolution> {
        self.subscriber.set_resolution_quality(quality)
    }

    pub async fn list_input_devices(&self, kind: MediaKind) -> Result<Vec<Device>, HuddleError> {
        self.devices.list_input_devices(kind).await
    }

    pub fn connection_state(&self, session_id: &str) -> Option<ConnectionState> {
        self.connection
            .registry()
            .get(session_id)
            .map(|handle| handle.state())
    }

    pub fn latest_stream(&self, session_id: &str) -> Option<StreamInfo> {
        self.connection
            .registry()
            .get(session_id)
            .and_then(|handle| handle.latest_stream())
    }

    pub fn publisher_devices(&self) -> Option<PublisherDevices> {
        self.publisher.devices()
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.is_active()
    }

    pub fn has_subscriber(&self) -> bool {
        self.subscriber.is_active()
    }

    /// Release everything: subscriber, publisher, then every live session.
    pub async fn shutdown(mut self) {
        self.subscriber.release().await;
        self.publisher.destroy().await;
        self.connection.shutdown().await;
        tracing::info!("coordinator shut down");
    }
}
