use crate::core::config::EngineConfig;
use crate::core::engine::auth::{AuthContext, Authenticator, WsSigner};
use crate::core::engine::codec::OutboundFrame;
use crate::core::engine::connection::{Connection, TungsteniteConnection};
use crate::core::engine::dispatcher::{dispatch, DispatchOutcome};
use crate::core::engine::registry::{SubscriptionToken, TopicHandler, TopicRegistry};
use crate::core::engine::subscription::SubscriptionManager;
use crate::core::errors::EngineError;
use crate::core::types::{
    Endpoint, EngineState, Flow, MarketSegment, StopReason, TopicKey, MAINNET_WS_URL,
    TESTNET_WS_URL,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Service handle for one endpoint: owns the connection, the topic
/// registry and the subscription manager, and drives both consumption
/// modes. `step` processes exactly one inbound frame; `run` is the managed
/// loop with cancellation and an optional reconnect policy. Both are
/// callers of the same state machine:
///
/// `Idle -> Authenticating (private only) -> Subscribing -> Active ->
/// {Stopped, Failed}`
pub struct WsClient<C: Connection> {
    conn: C,
    endpoint: Endpoint,
    config: EngineConfig,
    registry: TopicRegistry,
    subs: SubscriptionManager,
    auth: Option<Authenticator>,
    state: EngineState,
}

impl WsClient<TungsteniteConnection> {
    /// Handle for a public market-data endpoint. No authentication.
    pub fn public(segment: MarketSegment, config: EngineConfig) -> Self {
        let endpoint = Endpoint::public(segment);
        let conn = Self::transport(&endpoint, &config);
        Self::assemble(conn, endpoint, config, None)
    }

    /// Handle for the private endpoint. Requires credentials in the config.
    pub fn private(config: EngineConfig) -> Result<Self, EngineError> {
        let endpoint = Endpoint::private();
        let conn = Self::transport(&endpoint, &config);
        let auth = Self::authenticator(&config)?;
        Ok(Self::assemble(conn, endpoint, config, Some(auth)))
    }

    fn transport(endpoint: &Endpoint, config: &EngineConfig) -> TungsteniteConnection {
        let base = config.base_url.clone().unwrap_or_else(|| {
            if config.testnet {
                TESTNET_WS_URL.to_string()
            } else {
                MAINNET_WS_URL.to_string()
            }
        });
        TungsteniteConnection::new(endpoint.url(&base), config.connect_timeout_ms)
    }
}

impl<C: Connection> WsClient<C> {
    /// Build a handle over an injected transport. This is how tests drive
    /// the engine against a scripted connection.
    pub fn with_connection(
        conn: C,
        endpoint: Endpoint,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let auth = if endpoint.is_private() {
            Some(Self::authenticator(&config)?)
        } else {
            None
        };
        Ok(Self::assemble(conn, endpoint, config, auth))
    }

    fn authenticator(config: &EngineConfig) -> Result<Authenticator, EngineError> {
        let ctx = AuthContext::from_config(config)?;
        Ok(Authenticator::new(
            ctx,
            Duration::from_millis(config.auth_timeout_ms),
        ))
    }

    fn assemble(
        conn: C,
        endpoint: Endpoint,
        config: EngineConfig,
        auth: Option<Authenticator>,
    ) -> Self {
        Self {
            conn,
            endpoint,
            config,
            registry: TopicRegistry::new(),
            subs: SubscriptionManager::new(),
            auth,
            state: EngineState::Idle,
        }
    }

    /// Replace the auth canonicalization (endpoint-version-dependent).
    #[must_use]
    pub fn with_ws_signer(mut self, signer: Box<dyn WsSigner>) -> Self {
        if let Some(auth) = self.auth.take() {
            self.auth = Some(auth.with_signer(signer));
        }
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Open the socket, authenticate if the endpoint is private, and flush
    /// every registered subscription. Completes in `Active`.
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<(), EngineError> {
        if matches!(
            self.state,
            EngineState::Authenticating | EngineState::Subscribing | EngineState::Active
        ) {
            return Err(EngineError::InvalidState(
                "connection already established".to_string(),
            ));
        }
        self.establish().await
    }

    async fn establish(&mut self) -> Result<(), EngineError> {
        if let Err(e) = self.conn.open().await {
            self.state = EngineState::Failed;
            return Err(e);
        }

        if let Some(auth) = &self.auth {
            self.state = EngineState::Authenticating;
            if let Err(e) = auth.authenticate(&mut self.conn).await {
                // Auth failure is fatal for the handle; no subscribe frame
                // may go out after it.
                self.state = EngineState::Failed;
                return Err(e);
            }
        }

        self.state = EngineState::Subscribing;
        if let Err(e) = self
            .subs
            .resubscribe_all(&mut self.conn, &mut self.registry)
            .await
        {
            self.state = EngineState::Failed;
            return Err(e);
        }

        self.state = EngineState::Active;
        Ok(())
    }

    /// Register a typed callback for a topic. The payload is deserialized
    /// into `T` before the callback runs. Registering a key that is already
    /// present replaces the prior entry.
    ///
    /// Returns a token usable with [`WsClient::unsubscribe`].
    pub async fn subscribe<T, F>(
        &mut self,
        key: TopicKey,
        mut callback: F,
    ) -> Result<SubscriptionToken, EngineError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Flow + Send + 'static,
    {
        let handler: TopicHandler = Box::new(move |frame: &Value| {
            let message: T = serde_json::from_value(frame.clone())
                .map_err(|e| EngineError::ProtocolError(format!("payload decode failed: {}", e)))?;
            Ok(callback(message))
        });
        self.subscribe_with(key, handler).await
    }

    /// Register a raw decoder+callback pair for a topic. For callers that
    /// bring their own decoding (the typed [`WsClient::subscribe`] is built
    /// on top of this).
    pub async fn subscribe_with(
        &mut self,
        key: TopicKey,
        handler: TopicHandler,
    ) -> Result<SubscriptionToken, EngineError> {
        let topic = key.topic();
        let token = self.registry.register(key, handler);
        if self.state == EngineState::Active {
            self.subs.subscribe(&mut self.conn, vec![topic]).await?;
        }
        Ok(token)
    }

    /// Register a typed callback on a fixed single-topic channel (the
    /// parameterless private channels: `position`, `order`, `wallet`, ...).
    pub async fn register_func<T, F>(
        &mut self,
        channel: &str,
        callback: F,
    ) -> Result<SubscriptionToken, EngineError>
    where
        T: DeserializeOwned,
        F: FnMut(T) -> Flow + Send + 'static,
    {
        self.subscribe(TopicKey::new(channel), callback).await
    }

    /// Drop a subscription and tell the server. A token from a superseded
    /// registration is a no-op.
    pub async fn unsubscribe(&mut self, token: &SubscriptionToken) -> Result<(), EngineError> {
        if !self.registry.unregister(token) {
            return Ok(());
        }
        if self.state == EngineState::Active {
            self.subs
                .unsubscribe(&mut self.conn, vec![token.topic().to_string()])
                .await?;
        }
        Ok(())
    }

    /// Send a heartbeat frame.
    pub async fn ping(&mut self) -> Result<(), EngineError> {
        self.conn.send(OutboundFrame::Ping).await
    }

    /// Process exactly one inbound frame: receive, dispatch, return the
    /// callback outcome. Transport errors are returned directly; retrying
    /// is the caller's decision in this mode.
    pub async fn step(&mut self) -> Result<Flow, EngineError> {
        if self.state != EngineState::Active {
            return Err(EngineError::InvalidState(format!(
                "step() requires an active connection, state is {:?}",
                self.state
            )));
        }

        match self.conn.receive().await {
            Ok(Some(text)) => {
                match dispatch(&mut self.registry, &mut self.subs, &text) {
                    DispatchOutcome::Continue => Ok(Flow::Continue),
                    DispatchOutcome::Stop => {
                        self.state = EngineState::Stopped;
                        Ok(Flow::Stop)
                    }
                }
            }
            Ok(None) => {
                self.state = EngineState::Failed;
                Err(EngineError::TransportError(
                    "connection closed by peer".to_string(),
                ))
            }
            Err(e) => {
                self.state = EngineState::Failed;
                Err(e)
            }
        }
    }

    /// Managed loop: step until the cancellation signal fires, a callback
    /// returns [`Flow::Stop`], or an unrecoverable error occurs.
    ///
    /// Cancellation is cooperative and observed between receives; once it
    /// is acknowledged no further callback runs. Transport errors are
    /// reported to `on_err` and then handled per the configured
    /// [`ReconnectPolicy`](crate::core::config::ReconnectPolicy): with
    /// reconnection disabled (the default) the loop fails on the first one.
    #[instrument(skip_all)]
    pub async fn run<F>(
        &mut self,
        mut cancel: watch::Receiver<bool>,
        mut on_err: F,
    ) -> Result<StopReason, EngineError>
    where
        F: FnMut(&EngineError) + Send,
    {
        if self.state == EngineState::Idle {
            self.establish().await?;
        }

        loop {
            if *cancel.borrow() {
                self.state = EngineState::Stopped;
                return Ok(StopReason::Cancelled);
            }

            tokio::select! {
                biased;

                changed = cancel.changed() => {
                    // A dropped sender counts as cancellation too.
                    if changed.is_err() || *cancel.borrow() {
                        self.state = EngineState::Stopped;
                        return Ok(StopReason::Cancelled);
                    }
                }

                stepped = self.step() => {
                    match stepped {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => return Ok(StopReason::Callback),
                        Err(e) if e.is_transport() => {
                            on_err(&e);
                            self.recover(e).await?;
                        }
                        Err(e) => {
                            self.state = EngineState::Failed;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Reconnect with backoff after a transport failure, bounded by the
    /// retry budget. Re-authenticates with a fresh signature and re-issues
    /// every subscription. Serialized by construction: only the run loop
    /// initiates recovery.
    async fn recover(&mut self, cause: EngineError) -> Result<(), EngineError> {
        let policy = self.config.reconnect.clone();
        if !policy.enabled {
            self.state = EngineState::Failed;
            return Err(cause);
        }

        let mut delay = Duration::from_millis(policy.initial_delay_ms);
        for attempt in 1..=policy.max_attempts {
            sleep(delay).await;

            match self.establish().await {
                Ok(()) => {
                    info!(attempt, "reconnected and resubscribed");
                    return Ok(());
                }
                // A rejected signature will not get better by retrying.
                Err(e @ EngineError::AuthError(_)) => {
                    self.state = EngineState::Failed;
                    return Err(e);
                }
                Err(e) => {
                    error!(attempt, error = %e, "reconnection attempt failed");
                    delay = std::cmp::min(delay * 2, Duration::from_secs(60));
                }
            }
        }

        self.state = EngineState::Failed;
        warn!(cause = %cause, "reconnect budget exhausted");
        Err(EngineError::TransportError(format!(
            "failed to reconnect after {} attempts",
            policy.max_attempts
        )))
    }

    /// Close the connection and finish in `Stopped`.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        self.conn.close().await?;
        self.state = EngineState::Stopped;
        Ok(())
    }
}
