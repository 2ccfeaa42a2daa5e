use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use huddle_core::provider::{Device, MediaKind, ProviderError};
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;

/// Microphones visible to the default cpal host. The device name doubles as its id.
pub fn input_devices() -> Result<Vec<Device>, ProviderError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| ProviderError::new("DeviceEnumerationError", e.to_string()))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| Device {
            id: name.clone(),
            kind: MediaKind::Audio,
            label: name,
        })
        .collect())
}

/// Resample interleaved f32 frames to `out_rate` and `out_channels`, as i16.
///
/// Nearest-neighbour in time. Extra output channels repeat the last input
/// channel; a mono output averages every input channel.
pub fn convert_frames(
    data: &[f32],
    in_channels: usize,
    in_rate: u32,
    out_channels: usize,
    out_rate: u32,
) -> Vec<i16> {
    if in_channels == 0 || out_channels == 0 || data.len() < in_channels {
        return Vec::new();
    }

    let in_frames = data.len() / in_channels;
    let out_frames = if in_rate == out_rate {
        in_frames
    } else {
        ((in_frames as u64 * out_rate as u64 / in_rate as u64) as usize).max(1)
    };

    let to_i16 = |s: f32| (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
    let mut pcm = Vec::with_capacity(out_frames * out_channels);
    for i in 0..out_frames {
        let src = if in_rate == out_rate {
            i
        } else {
            (i as u64 * in_frames as u64 / out_frames as u64) as usize
        };
        let frame = &data[src.min(in_frames - 1) * in_channels..][..in_channels];

        if out_channels == 1 {
            let sum: f32 = frame.iter().sum();
            pcm.push(to_i16(sum / in_channels as f32));
        } else {
            for ch in 0..out_channels {
                pcm.push(to_i16(frame[ch.min(in_channels - 1)]));
            }
        }
    }
    pcm
}

// cpal::Stream is !Send + !Sync; it is only kept alive here, never used across threads.
struct SendSyncStream(cpal::Stream);
unsafe impl Send for SendSyncStream {}
unsafe impl Sync for SendSyncStream {}

/// A running microphone feeding a [`NativeAudioSource`].
pub struct MicCapture {
    _stream: SendSyncStream,
    running: Arc<AtomicBool>,
    device: String,
}

impl MicCapture {
    /// Start capturing from the input device named `device_id`, or the host
    /// default when `None`.
    pub fn start(
        device_id: Option<&str>,
        source: NativeAudioSource,
        sample_rate: u32,
        channels: u32,
    ) -> Result<Self, ProviderError> {
        let host = cpal::default_host();
        let device = match device_id {
            Some(id) => host
                .input_devices()
                .map_err(|e| ProviderError::new("DeviceEnumerationError", e.to_string()))?
                .find(|d| d.name().map(|name| name == id).unwrap_or(false))
                .ok_or_else(|| {
                    ProviderError::new("DeviceNotFound", format!("no input device named {id}"))
                })?,
            None => host.default_input_device().ok_or_else(|| {
                ProviderError::new("DeviceNotFound", "no input audio device available")
            })?,
        };
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_cfg = device
            .default_input_config()
            .map_err(|e| ProviderError::new("AudioCaptureError", format!("default input config: {e}")))?;
        let device_sr = default_cfg.sample_rate().0;
        let device_ch = default_cfg.channels();

        tracing::info!(
            "audio capture: device={name}, rate={device_sr}, channels={device_ch}, format={:?}",
            default_cfg.sample_format(),
        );

        let config = cpal::StreamConfig {
            channels: device_ch,
            sample_rate: cpal::SampleRate(device_sr),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();

        // capture_frame is async and the cpal callback is not
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProviderError::new("AudioCaptureError", format!("capture runtime: {e}")))?;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !running_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    let pcm = convert_frames(
                        data,
                        device_ch as usize,
                        device_sr,
                        channels as usize,
                        sample_rate,
                    );
                    if pcm.is_empty() {
                        return;
                    }
                    let samples_per_channel = (pcm.len() / channels as usize) as u32;
                    let frame = AudioFrame {
                        data: pcm.into(),
                        sample_rate,
                        num_channels: channels,
                        samples_per_channel,
                    };
                    let _ = rt.block_on(source.capture_frame(&frame));
                },
                |err| tracing::error!("audio capture stream error: {err}"),
                None,
            )
            .map_err(|e| ProviderError::new("AudioCaptureError", format!("build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| ProviderError::new("AudioCaptureError", format!("play input stream: {e}")))?;

        Ok(Self {
            _stream: SendSyncStream(stream),
            running,
            device: name,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        tracing::info!("audio capture from {} stopped", self.device);
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
