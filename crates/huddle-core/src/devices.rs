use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::HuddleError;
use crate::provider::{Device, MediaKind, RtcProvider};

/// Position of the last selected device within a per-kind device list.
///
/// The index is reduced modulo the length of whatever list is current at the
/// next rotation, so a list that changed size in between can make rotation
/// skip or repeat a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationCursor {
    pub index: usize,
}

impl RotationCursor {
    /// Advance and return the new index for a list of `len` entries.
    pub fn advance(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        self.index = (self.index + 1) % len;
        Some(self.index)
    }
}

/// Lists platform input devices and walks through them in rotation order.
///
/// Nothing is cached: every call re-queries the provider so hot-plugged
/// devices show up on the next rotation.
pub struct DeviceEnumerator {
    provider: Arc<dyn RtcProvider>,
    cursors: HashMap<MediaKind, RotationCursor>,
}

impl DeviceEnumerator {
    pub fn new(provider: Arc<dyn RtcProvider>) -> Self {
        Self {
            provider,
            cursors: HashMap::new(),
        }
    }

    /// Current input devices of `kind`, in platform order.
    ///
    /// Fails with [`HuddleError::Capability`] when enumeration is denied or
    /// the platform reports no input devices at all.
    pub async fn list_input_devices(&self, kind: MediaKind) -> Result<Vec<Device>, HuddleError> {
        let devices = self
            .provider
            .enumerate_devices()
            .await
            .map_err(|e| HuddleError::Capability(e.to_string()))?;

        if devices.is_empty() {
            return Err(HuddleError::Capability(
                "platform reported no input devices".into(),
            ));
        }

        Ok(devices.into_iter().filter(|d| d.kind == kind).collect())
    }

    /// Advance the `kind` cursor and return the device it lands on.
    pub async fn next_device(&mut self, kind: MediaKind) -> Result<Device, HuddleError> {
        let mut devices = self.list_input_devices(kind).await?;
        let cursor = self.cursors.entry(kind).or_default();
        let index = cursor
            .advance(devices.len())
            .ok_or(HuddleError::NoDevice(kind))?;
        tracing::debug!(
            "rotating {kind} input to index {index} of {}",
            devices.len()
        );
        Ok(devices.swap_remove(index))
    }

    pub fn cursor(&self, kind: MediaKind) -> RotationCursor {
        self.cursors.get(&kind).copied().unwrap_or_default()
    }

    /// Reposition the `kind` cursor, e.g. to the device a publisher opened with.
    pub fn set_cursor(&mut self, kind: MediaKind, index: usize) {
        self.cursors.insert(kind, RotationCursor { index });
    }
}
