use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::errors::HuddleError;
use crate::events::{EventEmitter, HuddleEvent, SubscriberState};
use crate::provider::{
    FitMode, RenderTarget, Resolution, RtcSession, RtcSubscriber, SubscribeSettings,
    SubscriberEvent,
};
use crate::registry::SessionHandle;

/// Requested playback quality of the remote video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionQuality {
    Low,
    Medium,
    High,
}

impl ResolutionQuality {
    pub fn resolution(self) -> Resolution {
        match self {
            Self::High => Resolution { width: 1920, height: 1080 },
            Self::Medium => Resolution { width: 960, height: 540 },
            Self::Low => Resolution { width: 480, height: 270 },
        }
    }
}

impl fmt::Display for ResolutionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for ResolutionQuality {
    type Err = HuddleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(HuddleError::Config(format!(
                "{other} is not a resolution quality"
            ))),
        }
    }
}

/// Contain-fit, no SDK-provided UI controls.
pub fn subscribe_settings() -> SubscribeSettings {
    SubscribeSettings {
        fit_mode: FitMode::Contain,
        show_controls: false,
    }
}

struct ActiveSubscriber {
    session_id: String,
    session: Arc<dyn RtcSession>,
    subscriber: Arc<dyn RtcSubscriber>,
    target: RenderTarget,
    resolution: Option<Resolution>,
    observer: JoinHandle<()>,
}

/// Owns the single remote subscription.
pub struct SubscriberController {
    emitter: EventEmitter,
    slot: Option<ActiveSubscriber>,
}

impl SubscriberController {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter,
            slot: None,
        }
    }

    /// Subscribe to the most recent stream announced on `handle`'s session.
    ///
    /// Does nothing if no stream has been announced yet. A live subscriber is
    /// released before the new one is created. Provider errors are logged.
    pub async fn start_subscribe(&mut self, handle: &SessionHandle, target: RenderTarget) {
        let Some(stream) = handle.latest_stream() else {
            tracing::debug!("start_subscribe: no stream observed in session {}", handle.id());
            return;
        };

        self.release().await;

        let session = handle.session();
        let link = match session
            .subscribe(&stream, &target, &subscribe_settings())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("error subscribing to stream {}: {e}", stream.id);
                return;
            }
        };

        let subscriber_id = link.subscriber.id();
        tracing::info!(
            "subscriber {subscriber_id} rendering stream {} into {}",
            stream.id,
            target.as_str()
        );
        let observer = tokio::spawn(Self::observe(
            subscriber_id,
            link.events,
            self.emitter.clone(),
        ));

        self.slot = Some(ActiveSubscriber {
            session_id: handle.id().to_string(),
            session,
            subscriber: link.subscriber,
            target,
            resolution: None,
            observer,
        });
    }

    /// Unsubscribe the live subscriber if it belongs to `session_id`.
    pub async fn stop_subscribe(&mut self, session_id: &str) {
        let owner = self.slot.as_ref().map(|active| active.session_id.clone());
        match owner {
            Some(owner) if owner == session_id => self.release().await,
            Some(owner) => tracing::debug!(
                "stop_subscribe: subscriber belongs to session {owner}, not {session_id}"
            ),
            None => tracing::debug!("stop_subscribe: no subscriber"),
        }
    }

    /// Ask the live subscriber for the dimensions of `quality`.
    ///
    /// Returns the requested resolution, or `None` when nothing is subscribed.
    pub fn set_resolution_quality(&mut self, quality: ResolutionQuality) -> Option<Resolution> {
        let Some(active) = self.slot.as_mut() else {
            tracing::debug!("set_resolution_quality({quality}): no subscriber");
            return None;
        };

        let resolution = quality.resolution();
        active.subscriber.set_preferred_resolution(resolution);
        active.resolution = Some(resolution);
        tracing::info!(
            "subscriber {} prefers {quality} ({}x{})",
            active.subscriber.id(),
            resolution.width,
            resolution.height
        );
        self.emitter.emit(HuddleEvent::ResolutionRequested {
            subscriber_id: active.subscriber.id(),
            resolution,
        });
        Some(resolution)
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    pub fn subscriber_id(&self) -> Option<String> {
        self.slot.as_ref().map(|active| active.subscriber.id())
    }

    pub fn stream_id(&self) -> Option<String> {
        self.slot.as_ref().map(|active| active.subscriber.stream_id())
    }

    pub fn target(&self) -> Option<&RenderTarget> {
        self.slot.as_ref().map(|active| &active.target)
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.slot.as_ref().and_then(|active| active.resolution)
    }

    /// Unsubscribe and drop the live subscriber, whatever session it is on.
    pub(crate) async fn release(&mut self) {
        let Some(active) = self.slot.take() else {
            return;
        };
        let subscriber_id = active.subscriber.id();
        active.session.unsubscribe(active.subscriber).await;
        active.observer.abort();
        tracing::info!("subscriber {subscriber_id} released");
    }

    async fn observe(
        subscriber_id: String,
        mut events: UnboundedReceiver<SubscriberEvent>,
        emitter: EventEmitter,
    ) {
        while let Some(event) = events.recv().await {
            let state = match event {
                SubscriberEvent::Connected => {
                    tracing::info!("subscriber {subscriber_id} connected");
                    SubscriberState::Connected
                }
                SubscriberEvent::Disconnected { reason } => {
                    tracing::info!("subscriber {subscriber_id} disconnected: {reason}");
                    SubscriberState::Disconnected
                }
                SubscriberEvent::Destroyed { reason } => {
                    tracing::info!("subscriber {subscriber_id} destroyed: {reason}");
                    SubscriberState::Destroyed
                }
            };
            let done = state == SubscriberState::Destroyed;
            emitter.emit(HuddleEvent::SubscriberChanged {
                subscriber_id: subscriber_id.clone(),
                state,
            });
            if done {
                break;
            }
        }
    }
}
