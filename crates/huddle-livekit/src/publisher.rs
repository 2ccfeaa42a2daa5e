use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use huddle_core::provider::{CaptureSettings, Device, ProviderError, Resolution, RtcPublisher};
use livekit::prelude::*;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;

use crate::audio::MicCapture;
use crate::camera::CameraCapture;

const AUDIO_QUEUE_SIZE_MS: u32 = 100;

/// Local microphone and camera tracks.
///
/// The microphone is captured through cpal and the camera through V4L2.
/// Where no camera backend is built in, the native shell pushes frames into
/// [`LiveKitPublisher::video_source`].
pub struct LiveKitPublisher {
    id: String,
    audio_source: NativeAudioSource,
    video_source: NativeVideoSource,
    audio_track: LocalAudioTrack,
    video_track: LocalVideoTrack,
    sample_rate: u32,
    channels: u32,
    resolution: Resolution,
    cameras: Vec<Device>,
    mic: Mutex<Option<MicCapture>>,
    camera: Mutex<Option<CameraCapture>>,
    destroyed: AtomicBool,
}

impl LiveKitPublisher {
    pub fn create(settings: &CaptureSettings, cameras: Vec<Device>) -> Self {
        let id = format!("pub-{}", uuid::Uuid::new_v4());
        let channels = if settings.stereo { 2 } else { 1 };

        let audio_source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: settings.echo_cancellation,
                noise_suppression: settings.noise_suppression,
                auto_gain_control: settings.auto_gain_control,
            },
            settings.audio_sample_rate,
            channels,
            AUDIO_QUEUE_SIZE_MS,
        );
        let audio_track = LocalAudioTrack::create_audio_track(
            "microphone",
            RtcAudioSource::Native(audio_source.clone()),
        );

        let video_source = NativeVideoSource::new(
            VideoResolution {
                width: settings.resolution.width,
                height: settings.resolution.height,
            },
            false,
        );
        let video_track = LocalVideoTrack::create_video_track(
            "camera",
            RtcVideoSource::Native(video_source.clone()),
        );

        // A publisher without a microphone still publishes video.
        let mic = match MicCapture::start(
            settings.audio_source.as_deref(),
            audio_source.clone(),
            settings.audio_sample_rate,
            channels,
        ) {
            Ok(capture) => Some(capture),
            Err(e) => {
                tracing::warn!("publisher {id}: microphone unavailable: {e}");
                None
            }
        };

        let camera = match CameraCapture::start(
            settings.video_source.as_deref(),
            video_source.clone(),
            settings.resolution,
        ) {
            Ok(capture) => Some(capture),
            Err(e) => {
                tracing::warn!("publisher {id}: no camera feed: {e}");
                None
            }
        };

        if let Some(target) = &settings.target {
            tracing::debug!("publisher {id}: local preview goes to {}", target.as_str());
        }

        Self {
            id,
            audio_source,
            video_source,
            audio_track,
            video_track,
            sample_rate: settings.audio_sample_rate,
            channels,
            resolution: settings.resolution,
            cameras,
            mic: Mutex::new(mic),
            camera: Mutex::new(camera),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn audio_track(&self) -> LocalAudioTrack {
        self.audio_track.clone()
    }

    pub fn video_track(&self) -> LocalVideoTrack {
        self.video_track.clone()
    }

    /// Source the native camera capture feeds frames into.
    pub fn video_source(&self) -> NativeVideoSource {
        self.video_source.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<(), ProviderError> {
        if self.is_destroyed() {
            return Err(ProviderError::new(
                "PublisherDestroyed",
                format!("publisher {} was destroyed", self.id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RtcPublisher for LiveKitPublisher {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn set_audio_source(&self, device_id: &str) -> Result<(), ProviderError> {
        self.check_alive()?;
        let capture = MicCapture::start(
            Some(device_id),
            self.audio_source.clone(),
            self.sample_rate,
            self.channels,
        )?;
        tracing::info!("publisher {}: microphone is now {}", self.id, capture.device());
        let previous = self
            .mic
            .lock()
            .map_err(|_| ProviderError::new("AudioCaptureError", "capture state poisoned"))?
            .replace(capture);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    async fn set_video_source(&self, device_id: &str) -> Result<(), ProviderError> {
        self.check_alive()?;
        if !self.cameras.iter().any(|camera| camera.id == device_id) {
            return Err(ProviderError::new(
                "DeviceNotFound",
                format!("no camera with id {device_id}"),
            ));
        }

        // The device must be released before it can be opened again.
        let previous = self
            .camera
            .lock()
            .map_err(|_| ProviderError::new("VideoCaptureError", "capture state poisoned"))?
            .take();
        let source = self.video_source.clone();
        let resolution = self.resolution;
        let device = device_id.to_string();
        let capture = tokio::task::spawn_blocking(move || {
            if let Some(previous) = previous {
                previous.stop();
            }
            CameraCapture::start(Some(&device), source, resolution)
        })
        .await
        .map_err(|e| ProviderError::new("VideoCaptureError", e.to_string()))??;

        tracing::info!("publisher {}: camera is now {}", self.id, capture.device());
        let replaced = self
            .camera
            .lock()
            .map_err(|_| ProviderError::new("VideoCaptureError", "capture state poisoned"))?
            .replace(capture);
        drop(replaced);
        Ok(())
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mic) = self.mic.lock().ok().and_then(|mut mic| mic.take()) {
            mic.stop();
        }
        let camera = self.camera.lock().ok().and_then(|mut camera| camera.take());
        if let Some(camera) = camera {
            if tokio::task::spawn_blocking(move || camera.stop()).await.is_err() {
                tracing::warn!("publisher {}: camera did not stop cleanly", self.id);
            }
        }
        tracing::info!("publisher {} destroyed", self.id);
    }
}
