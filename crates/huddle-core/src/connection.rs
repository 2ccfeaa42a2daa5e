use std::sync::Arc;

use crate::errors::HuddleError;
use crate::events::ConnectionState;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::tokens::{Role, TokenCache};

/// Drives connect/disconnect for sessions.
///
/// Owns the token cache and the session registry; publish and subscribe
/// operations borrow session handles from here.
pub struct ConnectionController {
    tokens: TokenCache,
    registry: SessionRegistry,
}

impl ConnectionController {
    pub fn new(tokens: TokenCache, registry: SessionRegistry) -> Self {
        Self { tokens, registry }
    }

    /// Fetch a token, obtain the session handle and connect it.
    ///
    /// Reconnection is left to the SDK; on success this only attaches the
    /// observers that track it.
    pub async fn connect(
        &mut self,
        session_id: &str,
        role: Role,
    ) -> Result<Arc<SessionHandle>, HuddleError> {
        let token = self.tokens.get_token(session_id, role).await?;
        let handle = self.registry.get_or_create(session_id)?;

        handle.set_state(ConnectionState::Connecting);
        if let Err(e) = handle.session().connect(token.as_str()).await {
            tracing::warn!("error connecting to session {session_id}: {e}");
            handle.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        tracing::info!("connected to session {session_id} as {role}");
        handle.set_state(ConnectionState::Connected);
        if !handle.attach_reconnect_observers() {
            tracing::debug!("reconnect observers already attached to session {session_id}");
        }

        Ok(handle)
    }

    /// Disconnect the session. The handle stays registered.
    pub async fn disconnect(&mut self, session_id: &str) -> Result<Arc<SessionHandle>, HuddleError> {
        let handle = self.registry.get_or_create(session_id)?;
        Self::disconnect_handle(&handle).await;
        Ok(handle)
    }

    async fn disconnect_handle(handle: &SessionHandle) {
        // The SDK reports a disconnect of a live session back through its
        // event feed, possibly after a later connect.
        if handle.state() != ConnectionState::Disconnected {
            handle.expect_local_disconnect();
        }
        handle.session().disconnect().await;
        handle.set_state(ConnectionState::Disconnected);
        tracing::info!("disconnected from session {}", handle.id());
    }

    /// Disconnect every registered session that is not already disconnected.
    pub async fn disconnect_all(&mut self) {
        let live: Vec<_> = self
            .registry
            .handles()
            .filter(|handle| handle.state() != ConnectionState::Disconnected)
            .cloned()
            .collect();
        for handle in live {
            Self::disconnect_handle(&handle).await;
        }
    }

    /// Disconnect everything and stop listening to the SDK.
    pub async fn shutdown(&mut self) {
        self.disconnect_all().await;
        self.registry.shutdown();
    }

    pub(crate) fn session(&mut self, session_id: &str) -> Result<Arc<SessionHandle>, HuddleError> {
        self.registry.get_or_create(session_id)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::provider::{ProviderError, SessionEvent};
    use crate::testing::{FakeProvider, settle};
    use crate::tokens::tests::CountingIssuer;
    use chrono::Duration;

    fn controller(provider: Arc<FakeProvider>, issuer: Arc<CountingIssuer>) -> ConnectionController {
        ConnectionController::new(
            TokenCache::new(issuer, Duration::hours(24)),
            SessionRegistry::new(provider, EventEmitter::new()),
        )
    }

    #[tokio::test]
    async fn connect_uses_cached_token_and_session() {
        let provider = FakeProvider::new();
        let issuer = Arc::new(CountingIssuer::default());
        let mut connection = controller(provider.clone(), issuer.clone());

        let handle = connection.connect("s1", Role::Publisher).await.unwrap();

        assert_eq!(handle.state(), ConnectionState::Connected);
        assert!(handle.observers_attached());
        assert_eq!(
            provider.calls(),
            vec!["init_session:s1".to_string(), "connect:s1:tok-s1-1".to_string()]
        );
    }

    #[tokio::test]
    async fn connect_failure_carries_provider_error() {
        let provider = FakeProvider::new();
        provider.fail_connect(Some(ProviderError::new(
            "AuthenticationError",
            "invalid token",
        )));
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));

        let err = connection.connect("s1", Role::Subscriber).await.err().unwrap();

        match err {
            HuddleError::Connection { name, message } => {
                assert_eq!(name, "AuthenticationError");
                assert_eq!(message, "invalid token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let handle = connection.registry().get("s1").unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.observers_attached());
    }

    #[tokio::test]
    async fn token_failure_skips_session_creation() {
        let provider = FakeProvider::new();
        let issuer = Arc::new(CountingIssuer::default());
        *issuer.fail.lock().unwrap() = Some("network down".into());
        let mut connection = controller(provider.clone(), issuer);

        let err = connection.connect("s1", Role::Publisher).await.err().unwrap();

        assert!(matches!(err, HuddleError::TokenIssuance(_)));
        assert_eq!(provider.count_calls("init_session"), 0);
    }

    #[tokio::test]
    async fn reconnect_after_failure_reuses_token_and_handle() {
        let provider = FakeProvider::new();
        let issuer = Arc::new(CountingIssuer::default());
        provider.fail_connect(Some(ProviderError::new("Timeout", "timed out")));
        let mut connection = controller(provider.clone(), issuer.clone());

        assert!(connection.connect("s1", Role::Publisher).await.is_err());
        provider.fail_connect(None);
        let handle = connection.connect("s1", Role::Subscriber).await.unwrap();

        assert_eq!(issuer.requests.lock().unwrap().len(), 1);
        assert_eq!(provider.count_calls("init_session"), 1);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn provider_reconnection_is_observed() {
        let provider = FakeProvider::new();
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));
        let handle = connection.connect("s1", Role::Publisher).await.unwrap();

        provider.session("s1").emit(SessionEvent::Reconnecting);
        settle().await;
        assert_eq!(handle.state(), ConnectionState::Reconnecting { attempt: 1 });

        provider.session("s1").emit(SessionEvent::Reconnected);
        settle().await;
        assert_eq!(handle.state(), ConnectionState::Connected);
        assert_eq!(provider.count_calls("connect:"), 1);
    }

    #[tokio::test]
    async fn reconnect_survives_late_report_of_earlier_disconnect() {
        let provider = FakeProvider::new();
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));
        connection.connect("s1", Role::Publisher).await.unwrap();

        // The fake reports the disconnect on the event feed; nothing drains
        // it before the second connect completes.
        connection.disconnect("s1").await.unwrap();
        let handle = connection.connect("s1", Role::Publisher).await.unwrap();
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Connected);
        assert_eq!(provider.count_calls("connect:"), 2);
    }

    #[tokio::test]
    async fn network_drop_after_reconnect_still_disconnects() {
        let provider = FakeProvider::new();
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));
        connection.connect("s1", Role::Publisher).await.unwrap();
        connection.disconnect("s1").await.unwrap();
        let handle = connection.connect("s1", Role::Publisher).await.unwrap();
        settle().await;

        provider.session("s1").emit(SessionEvent::Disconnected {
            reason: "networkDisconnected".into(),
        });
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnecting_idle_session_expects_no_report() {
        let provider = FakeProvider::new();
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));

        connection.disconnect("s1").await.unwrap();
        let handle = connection.connect("s1", Role::Publisher).await.unwrap();
        provider.session("s1").emit(SessionEvent::Disconnected {
            reason: "serverShutdown".into(),
        });
        settle().await;

        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_keeps_handle_registered() {
        let provider = FakeProvider::new();
        let mut connection = controller(provider.clone(), Arc::new(CountingIssuer::default()));
        let connected = connection.connect("s1", Role::Publisher).await.unwrap();

        let disconnected = connection.disconnect("s1").await.unwrap();

        assert!(Arc::ptr_eq(&connected, &disconnected));
        assert_eq!(disconnected.state(), ConnectionState::Disconnected);
        assert!(connection.registry().get("s1").is_some());
        assert_eq!(provider.count_calls("disconnect:s1"), 1);
    }
}
