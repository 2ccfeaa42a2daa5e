use std::sync::{Arc, RwLock};

use crate::provider::{Device, MediaKind, Resolution, StreamInfo};

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum HuddleEvent {
    ConnectionStateChanged { session_id: String, state: ConnectionState },
    StreamCreated { session_id: String, stream: StreamInfo },
    PublisherCreated { publisher_id: String },
    PublisherDestroyed { publisher_id: String },
    InputDeviceChanged { kind: MediaKind, device: Device },
    SubscriberChanged { subscriber_id: String, state: SubscriberState },
    ResolutionRequested { subscriber_id: String, resolution: Resolution },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberState {
    Connected,
    Disconnected,
    Destroyed,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait HuddleEventListener: Send + Sync {
    fn on_event(&self, event: HuddleEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn HuddleEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn HuddleEventListener>) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn emit(&self, event: HuddleEvent) {
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
