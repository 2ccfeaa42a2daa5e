use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::HuddleError;
use crate::events::{ConnectionState, EventEmitter, HuddleEvent};
use crate::provider::{RtcProvider, RtcSession, SessionEvent, StreamInfo};

/// One SDK session plus the state the coordinator tracks for it.
///
/// Created once per identifier by [`SessionRegistry`] and never replaced.
pub struct SessionHandle {
    id: String,
    session: Arc<dyn RtcSession>,
    emitter: EventEmitter,
    state: watch::Sender<ConnectionState>,
    latest_stream: watch::Sender<Option<StreamInfo>>,
    observers_attached: AtomicBool,
    /// Local disconnects whose `Disconnected` report has not arrived yet.
    pending_local_disconnects: AtomicUsize,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session(&self) -> Arc<dyn RtcSession> {
        self.session.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// The most recently announced remote stream, if any.
    pub fn latest_stream(&self) -> Option<StreamInfo> {
        self.latest_stream.borrow().clone()
    }

    pub fn observers_attached(&self) -> bool {
        self.observers_attached.load(Ordering::SeqCst)
    }

    /// Start reacting to reconnecting/reconnected/disconnected events.
    ///
    /// Returns `false` if the observers were already attached.
    pub(crate) fn attach_reconnect_observers(&self) -> bool {
        !self.observers_attached.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            self.emitter.emit(HuddleEvent::ConnectionStateChanged {
                session_id: self.id.clone(),
                state,
            });
        }
    }

    /// Record that the SDK is about to report a disconnect this client asked for.
    pub(crate) fn expect_local_disconnect(&self) {
        self.pending_local_disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn take_local_disconnect(&self) -> bool {
        self.pending_local_disconnects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Stop reacting to SDK events. Later events are dropped with the feed.
    pub(crate) fn close(&self) {
        let task = self.event_loop.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
            tracing::debug!("session {} event loop stopped", self.id);
        }
    }

    fn on_reconnecting(&self) {
        let attempt = match self.state() {
            ConnectionState::Reconnecting { attempt } => attempt + 1,
            _ => 1,
        };
        tracing::info!("session {} reconnecting (attempt {attempt})", self.id);
        self.set_state(ConnectionState::Reconnecting { attempt });
    }

    async fn event_loop(self: Arc<Self>, mut events: UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StreamCreated(stream) => {
                    tracing::info!("stream {} created in session {}", stream.id, self.id);
                    self.latest_stream.send_replace(Some(stream.clone()));
                    self.emitter.emit(HuddleEvent::StreamCreated {
                        session_id: self.id.clone(),
                        stream,
                    });
                }

                event if !self.observers_attached() => {
                    tracing::debug!("session {}: {event:?} before connect, ignored", self.id);
                }

                SessionEvent::Reconnecting => self.on_reconnecting(),

                SessionEvent::Reconnected => {
                    tracing::info!("session {} reconnected", self.id);
                    self.set_state(ConnectionState::Connected);
                }

                SessionEvent::Disconnected { reason } => {
                    if self.take_local_disconnect() {
                        tracing::debug!("session {}: report of local disconnect ({reason})", self.id);
                        continue;
                    }
                    match self.state() {
                        ConnectionState::Connected | ConnectionState::Reconnecting { .. } => {
                            tracing::info!("session {} disconnected: {reason}", self.id);
                            self.set_state(ConnectionState::Disconnected);
                        }
                        state => {
                            tracing::debug!("session {}: disconnect ({reason}) while {state:?}, ignored", self.id);
                        }
                    }
                }
            }
        }

        tracing::debug!("session {} event loop ended", self.id);
    }
}

/// Memoizes one [`SessionHandle`] per session identifier.
pub struct SessionRegistry {
    provider: Arc<dyn RtcProvider>,
    emitter: EventEmitter,
    sessions: HashMap<String, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(provider: Arc<dyn RtcProvider>, emitter: EventEmitter) -> Self {
        Self {
            provider,
            emitter,
            sessions: HashMap::new(),
        }
    }

    /// Return the handle for `session_id`, creating it on first use.
    ///
    /// Creation registers the `streamCreated` handler by spawning the
    /// session's event loop, so it must run inside a tokio runtime.
    pub(crate) fn get_or_create(&mut self, session_id: &str) -> Result<Arc<SessionHandle>, HuddleError> {
        if !self.provider.check_capability() {
            return Err(HuddleError::UnsupportedClient);
        }

        if let Some(handle) = self.sessions.get(session_id) {
            return Ok(handle.clone());
        }

        let link = self.provider.init_session(session_id);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (latest_stream, _) = watch::channel(None);
        let handle = Arc::new(SessionHandle {
            id: session_id.to_string(),
            session: link.session,
            emitter: self.emitter.clone(),
            state,
            latest_stream,
            observers_attached: AtomicBool::new(false),
            pending_local_disconnects: AtomicUsize::new(0),
            event_loop: Mutex::new(None),
        });

        let task = tokio::spawn(handle.clone().event_loop(link.events));
        if let Ok(mut slot) = handle.event_loop.lock() {
            *slot = Some(task);
        }

        tracing::info!("session {session_id} initialized");
        self.sessions.insert(session_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).cloned()
    }

    pub fn handles(&self) -> impl Iterator<Item = &Arc<SessionHandle>> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session's event loop and forget the handles.
    pub(crate) fn shutdown(&mut self) {
        for (_, handle) in self.sessions.drain() {
            handle.close();
        }
    }
}
