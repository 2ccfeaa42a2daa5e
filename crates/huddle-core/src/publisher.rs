use std::sync::Arc;

use crate::devices::DeviceEnumerator;
use crate::errors::HuddleError;
use crate::events::{EventEmitter, HuddleEvent};
use crate::provider::{
    CaptureSettings, Device, MediaKind, RenderTarget, Resolution, RtcProvider, RtcPublisher,
};
use crate::registry::SessionHandle;

/// Capture parameters. Fixed at creation; raw audio is kept unprocessed.
const CAPTURE_RESOLUTION: Resolution = Resolution {
    width: 1920,
    height: 1080,
};
const CAPTURE_FRAME_RATE: u32 = 30;
const AUDIO_SAMPLE_RATE: u32 = 48_000;

pub fn capture_settings(target: Option<RenderTarget>) -> CaptureSettings {
    CaptureSettings {
        audio_source: None,
        video_source: None,
        resolution: CAPTURE_RESOLUTION,
        frame_rate: CAPTURE_FRAME_RATE,
        audio_sample_rate: AUDIO_SAMPLE_RATE,
        stereo: true,
        echo_cancellation: false,
        auto_gain_control: false,
        noise_suppression: false,
        target,
    }
}

/// Input devices the live publisher currently captures from.
/// `None` means the platform default it was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherDevices {
    pub audio: Option<String>,
    pub video: Option<String>,
}

struct ActivePublisher {
    publisher: Arc<dyn RtcPublisher>,
    devices: PublisherDevices,
    published_to: Option<String>,
}

/// Owns the single local capture object.
///
/// A new publisher is only ever created into an empty slot; the old one has
/// to be destroyed first.
pub struct PublisherController {
    provider: Arc<dyn RtcProvider>,
    emitter: EventEmitter,
    slot: Option<ActivePublisher>,
}

impl PublisherController {
    pub fn new(provider: Arc<dyn RtcProvider>, emitter: EventEmitter) -> Self {
        Self {
            provider,
            emitter,
            slot: None,
        }
    }

    /// Publish the local capture into `handle`'s session, creating the
    /// publisher if none is alive.
    ///
    /// Provider errors end the operation and are only logged.
    pub async fn start_publish(&mut self, handle: &SessionHandle, target: Option<RenderTarget>) {
        let existing = self.slot.as_ref().map(|active| active.publisher.clone());
        let publisher = match existing {
            Some(publisher) => publisher,
            None => {
                let settings = capture_settings(target);
                let publisher = match self.provider.create_publisher(&settings).await {
                    Ok(publisher) => publisher,
                    Err(e) => {
                        tracing::warn!("error creating publisher: {e}");
                        return;
                    }
                };
                tracing::info!("publisher {} created", publisher.id());
                self.emitter.emit(HuddleEvent::PublisherCreated {
                    publisher_id: publisher.id(),
                });
                self.slot = Some(ActivePublisher {
                    publisher: publisher.clone(),
                    devices: PublisherDevices::default(),
                    published_to: None,
                });
                publisher
            }
        };

        match handle.session().publish(publisher.clone()).await {
            Ok(()) => {
                tracing::info!("publisher {} published to session {}", publisher.id(), handle.id());
                if let Some(active) = self.slot.as_mut() {
                    active.published_to = Some(handle.id().to_string());
                }
            }
            Err(e) => tracing::warn!("error publishing to session {}: {e}", handle.id()),
        }
    }

    /// Unpublish the live publisher from `handle`'s session without destroying it.
    pub async fn stop_publish(&mut self, handle: &SessionHandle) {
        let Some(active) = self.slot.as_mut() else {
            tracing::debug!("stop_publish: no publisher");
            return;
        };
        handle.session().unpublish(active.publisher.clone()).await;
        active.published_to = None;
        tracing::info!("publisher {} unpublished from session {}", active.publisher.id(), handle.id());
    }

    /// Destroy the live publisher, emptying the slot. Returns whether one existed.
    pub async fn destroy(&mut self) -> bool {
        let Some(active) = self.slot.take() else {
            return false;
        };
        let publisher_id = active.publisher.id();
        active.publisher.destroy().await;
        tracing::info!("publisher {publisher_id} destroyed");
        self.emitter
            .emit(HuddleEvent::PublisherDestroyed { publisher_id });
        true
    }

    /// Move the live publisher's `kind` input to the next device.
    ///
    /// Without a live publisher this does nothing and returns `Ok(None)`.
    /// Enumeration failures are returned; a provider refusing the new source
    /// is logged and yields `Ok(None)`.
    pub async fn switch_input(
        &mut self,
        kind: MediaKind,
        devices: &mut DeviceEnumerator,
    ) -> Result<Option<Device>, HuddleError> {
        let Some(active) = self.slot.as_mut() else {
            tracing::debug!("switch {kind} input: no publisher");
            return Ok(None);
        };

        let device = devices.next_device(kind).await?;
        let applied = match kind {
            MediaKind::Audio => active.publisher.set_audio_source(&device.id).await,
            MediaKind::Video => active.publisher.set_video_source(&device.id).await,
        };
        if let Err(e) = applied {
            tracing::warn!("error switching {kind} input to {}: {e}", device.id);
            return Ok(None);
        }

        match kind {
            MediaKind::Audio => active.devices.audio = Some(device.id.clone()),
            MediaKind::Video => active.devices.video = Some(device.id.clone()),
        }
        tracing::info!("{kind} input switched to {} ({})", device.label, device.id);
        self.emitter.emit(HuddleEvent::InputDeviceChanged {
            kind,
            device: device.clone(),
        });
        Ok(Some(device))
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    pub fn publisher_id(&self) -> Option<String> {
        self.slot.as_ref().map(|active| active.publisher.id())
    }

    pub fn devices(&self) -> Option<PublisherDevices> {
        self.slot.as_ref().map(|active| active.devices.clone())
    }

    /// Session the live publisher is currently published to.
    pub fn published_to(&self) -> Option<&str> {
        self.slot.as_ref().and_then(|active| active.published_to.as_deref())
    }
}
