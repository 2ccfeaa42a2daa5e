//! Scripted in-memory SDK used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::events::{HuddleEvent, HuddleEventListener};
use crate::provider::{
    CaptureSettings, Device, MediaKind, ProviderError, RenderTarget, Resolution, RtcProvider,
    RtcPublisher, RtcSession, RtcSubscriber, SessionEvent, SessionLink, StreamInfo,
    SubscribeSettings, SubscriberEvent, SubscriptionLink,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, call: String) {
    log.lock().unwrap().push(call);
}

pub fn device(id: &str, kind: MediaKind) -> Device {
    Device {
        id: id.to_string(),
        kind,
        label: format!("{kind} {id}"),
    }
}

pub fn stream(id: &str) -> StreamInfo {
    StreamInfo {
        id: id.to_string(),
        connection_id: format!("conn-{id}"),
        has_audio: true,
        has_video: true,
    }
}

/// Let spawned event loops drain whatever was sent to them.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub struct FakeProvider {
    pub calls: CallLog,
    capable: AtomicBool,
    devices: Mutex<Result<Vec<Device>, ProviderError>>,
    connect_error: Arc<Mutex<Option<ProviderError>>>,
    publish_error: Arc<Mutex<Option<ProviderError>>>,
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
    publishers: Mutex<Vec<Arc<FakePublisher>>>,
    next_id: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            capable: AtomicBool::new(true),
            devices: Mutex::new(Ok(vec![
                device("mic-0", MediaKind::Audio),
                device("cam-0", MediaKind::Video),
            ])),
            connect_error: Arc::new(Mutex::new(None)),
            publish_error: Arc::new(Mutex::new(None)),
            sessions: Mutex::new(HashMap::new()),
            publishers: Mutex::new(Vec::new()),
            next_id: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn set_capable(&self, capable: bool) {
        self.capable.store(capable, Ordering::SeqCst);
    }

    pub fn set_devices(&self, devices: Result<Vec<Device>, ProviderError>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn fail_connect(&self, error: Option<ProviderError>) {
        *self.connect_error.lock().unwrap() = error;
    }

    pub fn fail_publish(&self, error: ProviderError) {
        *self.publish_error.lock().unwrap() = Some(error);
    }

    pub fn session(&self, session_id: &str) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .expect("session was never initialized")
    }

    pub fn publishers(&self) -> Vec<Arc<FakePublisher>> {
        self.publishers.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl RtcProvider for FakeProvider {
    fn check_capability(&self) -> bool {
        self.capable.load(Ordering::SeqCst)
    }

    fn init_session(&self, session_id: &str) -> SessionLink {
        record(&self.calls, format!("init_session:{session_id}"));
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession {
            id: session_id.to_string(),
            calls: self.calls.clone(),
            events_tx: tx,
            connect_error: self.connect_error.clone(),
            publish_error: self.publish_error.clone(),
            subscribers: Mutex::new(Vec::new()),
            next_id: self.next_id.clone(),
            connected: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), session.clone());
        SessionLink {
            session,
            events: rx,
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<Device>, ProviderError> {
        record(&self.calls, "enumerate_devices".to_string());
        self.devices.lock().unwrap().clone()
    }

    async fn create_publisher(
        &self,
        settings: &CaptureSettings,
    ) -> Result<Arc<dyn RtcPublisher>, ProviderError> {
        let id = format!("pub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        record(&self.calls, format!("create_publisher:{id}"));
        let publisher = Arc::new(FakePublisher {
            id,
            settings: settings.clone(),
            calls: self.calls.clone(),
            audio_source: Mutex::new(settings.audio_source.clone()),
            video_source: Mutex::new(settings.video_source.clone()),
            destroyed: AtomicBool::new(false),
        });
        self.publishers.lock().unwrap().push(publisher.clone());
        Ok(publisher)
    }
}

pub struct FakeSession {
    pub id: String,
    calls: CallLog,
    events_tx: UnboundedSender<SessionEvent>,
    connect_error: Arc<Mutex<Option<ProviderError>>>,
    publish_error: Arc<Mutex<Option<ProviderError>>>,
    subscribers: Mutex<Vec<(Arc<FakeSubscriber>, UnboundedSender<SubscriberEvent>)>>,
    next_id: Arc<AtomicUsize>,
    connected: AtomicBool,
}

impl FakeSession {
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn subscribers(&self) -> Vec<Arc<FakeSubscriber>> {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn emit_subscriber(&self, index: usize, event: SubscriberEvent) {
        if let Some((_, tx)) = self.subscribers.lock().unwrap().get(index) {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl RtcSession for FakeSession {
    async fn connect(&self, token: &str) -> Result<(), ProviderError> {
        record(&self.calls, format!("connect:{}:{token}", self.id));
        match self.connect_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Reports the disconnect on the event feed, like a real SDK.
    async fn disconnect(&self) {
        record(&self.calls, format!("disconnect:{}", self.id));
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(SessionEvent::Disconnected {
                reason: "clientInitiated".into(),
            });
        }
    }

    async fn publish(&self, publisher: Arc<dyn RtcPublisher>) -> Result<(), ProviderError> {
        record(&self.calls, format!("publish:{}:{}", self.id, publisher.id()));
        match self.publish_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn unpublish(&self, publisher: Arc<dyn RtcPublisher>) {
        record(&self.calls, format!("unpublish:{}:{}", self.id, publisher.id()));
    }

    async fn subscribe(
        &self,
        stream: &StreamInfo,
        target: &RenderTarget,
        settings: &SubscribeSettings,
    ) -> Result<SubscriptionLink, ProviderError> {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        record(
            &self.calls,
            format!("subscribe:{}:{}:{}:{id}", self.id, stream.id, target.as_str()),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(FakeSubscriber {
            id,
            stream_id: stream.id.clone(),
            settings: settings.clone(),
            resolution: Mutex::new(None),
        });
        self.subscribers
            .lock()
            .unwrap()
            .push((subscriber.clone(), tx));
        Ok(SubscriptionLink {
            subscriber,
            events: rx,
        })
    }

    async fn unsubscribe(&self, subscriber: Arc<dyn RtcSubscriber>) {
        record(&self.calls, format!("unsubscribe:{}:{}", self.id, subscriber.id()));
    }
}

pub struct FakePublisher {
    pub id: String,
    pub settings: CaptureSettings,
    calls: CallLog,
    audio_source: Mutex<Option<String>>,
    video_source: Mutex<Option<String>>,
    destroyed: AtomicBool,
}

impl FakePublisher {
    pub fn audio_source(&self) -> Option<String> {
        self.audio_source.lock().unwrap().clone()
    }

    pub fn video_source(&self) -> Option<String> {
        self.video_source.lock().unwrap().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtcPublisher for FakePublisher {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn set_audio_source(&self, device_id: &str) -> Result<(), ProviderError> {
        record(&self.calls, format!("set_audio_source:{}:{device_id}", self.id));
        *self.audio_source.lock().unwrap() = Some(device_id.to_string());
        Ok(())
    }

    async fn set_video_source(&self, device_id: &str) -> Result<(), ProviderError> {
        record(&self.calls, format!("set_video_source:{}:{device_id}", self.id));
        *self.video_source.lock().unwrap() = Some(device_id.to_string());
        Ok(())
    }

    async fn destroy(&self) {
        record(&self.calls, format!("destroy_publisher:{}", self.id));
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeSubscriber {
    pub id: String,
    pub stream_id: String,
    pub settings: SubscribeSettings,
    resolution: Mutex<Option<Resolution>>,
}

impl FakeSubscriber {
    pub fn resolution(&self) -> Option<Resolution> {
        *self.resolution.lock().unwrap()
    }
}

impl RtcSubscriber for FakeSubscriber {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn set_preferred_resolution(&self, resolution: Resolution) {
        *self.resolution.lock().unwrap() = Some(resolution);
    }
}

/// Listener that keeps every event it sees.
#[derive(Default)]
pub struct EventCapture {
    pub events: Mutex<Vec<HuddleEvent>>,
}

impl EventCapture {
    pub fn events(&self) -> Vec<HuddleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl HuddleEventListener for EventCapture {
    fn on_event(&self, event: HuddleEvent) {
        self.events.lock().unwrap().push(event);
    }
}
