//! Camera capture through V4L2.
//!
//! Opens the device in YUYV, converts every frame to I420 and feeds it into
//! the publisher's [`NativeVideoSource`]. Other platforms have no camera
//! backend here; their native shell pushes frames into the source itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use huddle_core::provider::{Device, ProviderError, Resolution};
use livekit::webrtc::video_source::native::NativeVideoSource;

#[cfg(target_os = "linux")]
const DEFAULT_CAMERA: &str = "/dev/video0";

/// Destination planes of one I420 frame, with their row strides.
pub struct I420Planes<'a> {
    pub y: (&'a mut [u8], usize),
    pub u: (&'a mut [u8], usize),
    pub v: (&'a mut [u8], usize),
}

/// Convert one packed YUYV frame into I420 planes.
///
/// Chroma of each 2x2 block is the average of its two rows. Returns `false`
/// when the frame is smaller than `width` x `height` or a size is odd.
pub fn yuyv_to_i420(
    yuyv: &[u8],
    src_stride: usize,
    width: usize,
    height: usize,
    planes: I420Planes<'_>,
) -> bool {
    if width % 2 != 0 || height % 2 != 0 || src_stride < width * 2 {
        return false;
    }
    if yuyv.len() < src_stride * (height - 1) + width * 2 {
        return false;
    }

    let (y_plane, y_stride) = planes.y;
    let (u_plane, u_stride) = planes.u;
    let (v_plane, v_stride) = planes.v;

    for row in (0..height).step_by(2) {
        let src0 = &yuyv[row * src_stride..][..width * 2];
        let src1 = &yuyv[(row + 1) * src_stride..][..width * 2];
        let chroma_row = row / 2;

        for col in (0..width).step_by(2) {
            // Y0 U Y1 V
            let a = &src0[col * 2..col * 2 + 4];
            let b = &src1[col * 2..col * 2 + 4];

            y_plane[row * y_stride + col] = a[0];
            y_plane[row * y_stride + col + 1] = a[2];
            y_plane[(row + 1) * y_stride + col] = b[0];
            y_plane[(row + 1) * y_stride + col + 1] = b[2];

            u_plane[chroma_row * u_stride + col / 2] = ((a[1] as u16 + b[1] as u16) / 2) as u8;
            v_plane[chroma_row * v_stride + col / 2] = ((a[3] as u16 + b[3] as u16) / 2) as u8;
        }
    }
    true
}

/// Cameras the V4L2 layer exposes, by device path.
#[cfg(target_os = "linux")]
pub fn video_devices() -> Vec<Device> {
    use huddle_core::provider::MediaKind;
    use v4l::capability::Flags;
    use v4l::video::Capture;

    v4l::context::enum_devices()
        .into_iter()
        .filter_map(|node| {
            let path = node.path().to_string_lossy().into_owned();
            let device = v4l::Device::with_path(node.path()).ok()?;
            let caps = device.query_caps().ok()?;
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                tracing::debug!("skipping {path}: not a capture device");
                return None;
            }
            // Metadata nodes list no formats
            device.enum_formats().ok().filter(|formats| !formats.is_empty())?;
            Some(Device {
                id: path,
                kind: MediaKind::Video,
                label: node.name().unwrap_or(caps.card),
            })
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
pub fn video_devices() -> Vec<Device> {
    Vec::new()
}

/// A running camera feeding a [`NativeVideoSource`].
pub struct CameraCapture {
    device: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CameraCapture {
    /// Start capturing from the camera at `device_id`, or `/dev/video0`.
    #[cfg(target_os = "linux")]
    pub fn start(
        device_id: Option<&str>,
        source: NativeVideoSource,
        resolution: Resolution,
    ) -> Result<Self, ProviderError> {
        use v4l::FourCC;
        use v4l::video::Capture;

        let path = device_id.unwrap_or(DEFAULT_CAMERA).to_string();
        let device = v4l::Device::with_path(&path)
            .map_err(|e| ProviderError::new("DeviceNotFound", format!("open camera {path}: {e}")))?;

        let yuyv = FourCC::new(b"YUYV");
        let mut format = device
            .format()
            .map_err(|e| ProviderError::new("VideoCaptureError", format!("query format: {e}")))?;
        format.width = resolution.width;
        format.height = resolution.height;
        format.fourcc = yuyv;
        let format = device
            .set_format(&format)
            .map_err(|e| ProviderError::new("VideoCaptureError", format!("set format: {e}")))?;
        if format.fourcc != yuyv {
            return Err(ProviderError::new(
                "VideoCaptureError",
                format!("camera {path} does not deliver YUYV (got {})", format.fourcc),
            ));
        }

        tracing::info!(
            "video capture: device={path}, {}x{}, stride={}",
            format.width,
            format.height,
            format.stride
        );

        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();
        let thread = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(device, format, source, running_flag))
            .map_err(|e| ProviderError::new("VideoCaptureError", format!("spawn capture: {e}")))?;

        Ok(Self {
            device: path,
            running,
            thread: Some(thread),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn start(
        _device_id: Option<&str>,
        _source: NativeVideoSource,
        _resolution: Resolution,
    ) -> Result<Self, ProviderError> {
        Err(ProviderError::new(
            "CameraUnavailable",
            "camera capture is only built in on Linux",
        ))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Stop capturing and wait for the device to be released. Blocks for up
    /// to one frame interval.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("camera capture thread for {} panicked", self.device);
            }
        }
        tracing::info!("video capture from {} stopped", self.device);
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(target_os = "linux")]
fn capture_loop(
    device: v4l::Device,
    format: v4l::Format,
    source: NativeVideoSource,
    running: Arc<AtomicBool>,
) {
    use livekit::webrtc::prelude::{I420Buffer, VideoFrame, VideoRotation};
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;

    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, 4) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("camera stream setup failed: {e}");
            return;
        }
    };

    let started = std::time::Instant::now();
    let (width, height) = (format.width, format.height);
    let mut dropped = 0u64;

    while running.load(Ordering::Relaxed) {
        let data = match stream.next() {
            Ok((data, _)) => data,
            Err(e) => {
                tracing::error!("camera capture error: {e}");
                break;
            }
        };

        let mut buffer = I420Buffer::new(width, height);
        let (y_stride, u_stride, v_stride) = buffer.strides();
        let (y, u, v) = buffer.data_mut();
        let converted = yuyv_to_i420(
            data,
            format.stride as usize,
            width as usize,
            height as usize,
            I420Planes {
                y: (y, y_stride as usize),
                u: (u, u_stride as usize),
                v: (v, v_stride as usize),
            },
        );
        if !converted {
            dropped += 1;
            if dropped == 1 || dropped % 300 == 0 {
                tracing::warn!("dropped {dropped} short camera frames");
            }
            continue;
        }

        let frame = VideoFrame {
            rotation: VideoRotation::VideoRotation0,
            timestamp_us: started.elapsed().as_micros() as i64,
            buffer,
        };
        source.capture_frame(&frame);
    }
}
