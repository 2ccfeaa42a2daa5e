use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use huddle_core::provider::{
    ProviderError, RenderTarget, Resolution, RtcPublisher, RtcSession, RtcSubscriber,
    SessionEvent, StreamInfo, SubscribeSettings, SubscriberEvent, SubscriptionLink,
};
use livekit::prelude::{
    LocalTrack, LocalTrackPublication, RemoteTrackPublication, Room, RoomEvent, RoomOptions,
};
use livekit::options::TrackPublishOptions;
use livekit::proto::VideoQuality;
use livekit::track::{RemoteTrack, RemoteVideoTrack, TrackKind, TrackSource};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::PublisherRegistry;

/// Remote video tracks and live subscriptions of one room.
#[derive(Default)]
struct RoomState {
    tracks: HashMap<String, (RemoteVideoTrack, RemoteTrackPublication)>,
    subscriptions: HashMap<String, (String, UnboundedSender<SubscriberEvent>)>,
}

type SharedRoomState = Arc<StdMutex<RoomState>>;

/// One LiveKit room, named after the session id.
pub struct LiveKitSession {
    id: String,
    url: String,
    events: UnboundedSender<SessionEvent>,
    publishers: PublisherRegistry,
    room: Mutex<Option<Arc<Room>>>,
    forwarder: StdMutex<Option<JoinHandle<()>>>,
    publications: Mutex<HashMap<String, Vec<LocalTrackPublication>>>,
    state: SharedRoomState,
}

impl LiveKitSession {
    pub fn new(
        id: &str,
        url: &str,
        events: UnboundedSender<SessionEvent>,
        publishers: PublisherRegistry,
    ) -> Self {
        Self {
            id: id.to_string(),
            url: url.to_string(),
            events,
            publishers,
            room: Mutex::new(None),
            forwarder: StdMutex::new(None),
            publications: Mutex::new(HashMap::new()),
            state: Arc::new(StdMutex::new(RoomState::default())),
        }
    }

    async fn connected_room(&self) -> Result<Arc<Room>, ProviderError> {
        self.room.lock().await.clone().ok_or_else(|| {
            ProviderError::new("NotConnected", format!("session {} is not connected", self.id))
        })
    }

    async fn forward_events(
        session_id: String,
        mut room_events: UnboundedReceiver<RoomEvent>,
        events: UnboundedSender<SessionEvent>,
        state: SharedRoomState,
    ) {
        while let Some(event) = room_events.recv().await {
            let forwarded = match event {
                RoomEvent::Reconnecting => Some(SessionEvent::Reconnecting),

                RoomEvent::Reconnected => Some(SessionEvent::Reconnected),

                RoomEvent::Disconnected { reason } => {
                    tracing::info!("room {session_id} disconnected: {reason:?}");
                    let _ = events.send(SessionEvent::Disconnected {
                        reason: format!("{reason:?}"),
                    });
                    break;
                }

                RoomEvent::TrackSubscribed { track, publication, participant } => {
                    let RemoteTrack::Video(video) = track else {
                        continue;
                    };
                    if publication.kind() != TrackKind::Video {
                        continue;
                    }
                    let stream = StreamInfo {
                        id: video.sid().to_string(),
                        connection_id: participant.sid().to_string(),
                        has_audio: participant
                            .track_publications()
                            .values()
                            .any(|p| p.kind() == TrackKind::Audio),
                        has_video: true,
                    };
                    if let Ok(mut state) = state.lock() {
                        state.tracks.insert(stream.id.clone(), (video, publication));
                    }
                    Some(SessionEvent::StreamCreated(stream))
                }

                RoomEvent::TrackUnsubscribed { track, .. } => {
                    let stream_id = track.sid().to_string();
                    if let Ok(mut state) = state.lock() {
                        state.tracks.remove(&stream_id);
                        for (stream, subscriber) in state.subscriptions.values() {
                            if *stream == stream_id {
                                let _ = subscriber.send(SubscriberEvent::Destroyed {
                                    reason: "streamDestroyed".into(),
                                });
                            }
                        }
                    }
                    None
                }

                _ => None,
            };

            if let Some(event) = forwarded {
                if events.send(event).is_err() {
                    break;
                }
            }
        }

        tracing::debug!("room {session_id} event forwarder ended");
    }
}

#[async_trait]
impl RtcSession for LiveKitSession {
    async fn connect(&self, token: &str) -> Result<(), ProviderError> {
        let mut options = RoomOptions::default();
        options.auto_subscribe = true;

        let (room, room_events) = Room::connect(&self.url, token, options)
            .await
            .map_err(|e| ProviderError::new("ConnectionError", e.to_string()))?;
        tracing::info!("room {} connected", self.id);

        // The replaced room's close is not a disconnect of this session.
        let old = self.forwarder.lock().ok().and_then(|mut slot| slot.take());
        if let Some(old) = old {
            old.abort();
        }
        let previous = self.room.lock().await.replace(Arc::new(room));
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::warn!("error closing previous room {}: {e}", self.id);
            }
        }

        let forwarder = tokio::spawn(Self::forward_events(
            self.id.clone(),
            room_events,
            self.events.clone(),
            self.state.clone(),
        ));
        if let Ok(mut slot) = self.forwarder.lock() {
            *slot = Some(forwarder);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        // Stop forwarding first so the close below is reported exactly once.
        let forwarder = self.forwarder.lock().ok().and_then(|mut slot| slot.take());
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        let room = self.room.lock().await.take();
        if let Some(room) = room {
            if let Err(e) = room.close().await {
                tracing::warn!("error closing room {}: {e}", self.id);
            }
            let _ = self.events.send(SessionEvent::Disconnected {
                reason: "ClientInitiated".into(),
            });
        }
        self.publications.lock().await.clear();
        if let Ok(mut state) = self.state.lock() {
            state.tracks.clear();
        }
    }

    async fn publish(&self, publisher: Arc<dyn RtcPublisher>) -> Result<(), ProviderError> {
        let publisher_id = publisher.id();
        let local = self
            .publishers
            .lock()
            .ok()
            .and_then(|publishers| publishers.get(&publisher_id).cloned())
            .ok_or_else(|| {
                ProviderError::new("InvalidPublisher", format!("unknown publisher {publisher_id}"))
            })?;
        let room = self.connected_room().await?;

        let mut publications = self.publications.lock().await;
        if publications.contains_key(&publisher_id) {
            tracing::debug!("publisher {publisher_id} already published to {}", self.id);
            return Ok(());
        }

        let participant = room.local_participant();
        let audio = participant
            .publish_track(
                LocalTrack::Audio(local.audio_track()),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ProviderError::new("PublishError", format!("publish audio: {e}")))?;
        let video = participant
            .publish_track(
                LocalTrack::Video(local.video_track()),
                TrackPublishOptions {
                    source: TrackSource::Camera,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ProviderError::new("PublishError", format!("publish video: {e}")))?;

        publications.insert(publisher_id, vec![audio, video]);
        Ok(())
    }

    async fn unpublish(&self, publisher: Arc<dyn RtcPublisher>) {
        let Some(published) = self.publications.lock().await.remove(&publisher.id()) else {
            return;
        };
        let Some(room) = self.room.lock().await.clone() else {
            return;
        };
        for publication in published {
            if let Err(e) = room.local_participant().unpublish_track(&publication.sid()).await {
                tracing::warn!("error unpublishing track {}: {e}", publication.sid());
            }
        }
    }

    async fn subscribe(
        &self,
        stream: &StreamInfo,
        target: &RenderTarget,
        settings: &SubscribeSettings,
    ) -> Result<SubscriptionLink, ProviderError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| ProviderError::new("SubscribeError", "room state poisoned"))?;
            let (track, publication) = state.tracks.get(&stream.id).cloned().ok_or_else(|| {
                ProviderError::new("StreamNotFound", format!("no track for stream {}", stream.id))
            })?;
            let subscriber = Arc::new(LiveKitSubscriber::new(
                track,
                publication,
                target.clone(),
                settings,
            ));
            state
                .subscriptions
                .insert(subscriber.id(), (stream.id.clone(), tx.clone()));
            subscriber
        };

        let _ = tx.send(SubscriberEvent::Connected);
        Ok(SubscriptionLink {
            subscriber,
            events: rx,
        })
    }

    async fn unsubscribe(&self, subscriber: Arc<dyn RtcSubscriber>) {
        if let Ok(mut state) = self.state.lock() {
            state.subscriptions.remove(&subscriber.id());
        }
    }
}

/// Simulcast layer to ask the server for when rendering at `resolution`.
pub fn video_quality_for(resolution: Resolution) -> VideoQuality {
    match resolution.width.max(resolution.height) {
        w if w >= 1920 => VideoQuality::High,
        w if w >= 960 => VideoQuality::Medium,
        _ => VideoQuality::Low,
    }
}

/// Remote video track bound to a render target.
///
/// The native shell resolves the target to a surface and attaches a renderer
/// to [`LiveKitSubscriber::track`]. Resolution hints go to the server as a
/// simulcast layer choice.
pub struct LiveKitSubscriber {
    id: String,
    track: RemoteVideoTrack,
    publication: RemoteTrackPublication,
    target: RenderTarget,
    preferred: StdMutex<Option<Resolution>>,
}

impl LiveKitSubscriber {
    fn new(
        track: RemoteVideoTrack,
        publication: RemoteTrackPublication,
        target: RenderTarget,
        settings: &SubscribeSettings,
    ) -> Self {
        let id = format!("sub-{}", uuid::Uuid::new_v4());
        tracing::debug!(
            "subscriber {id} renders {} into {} ({:?})",
            track.sid(),
            target.as_str(),
            settings.fit_mode
        );
        Self {
            id,
            track,
            publication,
            target,
            preferred: StdMutex::new(None),
        }
    }

    pub fn track(&self) -> RemoteVideoTrack {
        self.track.clone()
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub fn preferred_resolution(&self) -> Option<Resolution> {
        self.preferred.lock().ok().and_then(|preferred| *preferred)
    }
}

impl RtcSubscriber for LiveKitSubscriber {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.track.sid().to_string()
    }

    fn set_preferred_resolution(&self, resolution: Resolution) {
        if let Ok(mut preferred) = self.preferred.lock() {
            *preferred = Some(resolution);
        }
        let quality = video_quality_for(resolution);
        self.publication.set_video_quality(quality);
        tracing::debug!(
            "subscriber {} wants {}x{} ({quality:?})",
            self.id,
            resolution.width,
            resolution.height,
        );
    }
}
