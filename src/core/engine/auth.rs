use crate::core::config::EngineConfig;
use crate::core::engine::codec::{parse_inbound, InboundFrame, OutboundFrame};
use crate::core::engine::connection::Connection;
use crate::core::errors::EngineError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

/// Canonical string the login signature is computed over. The exact
/// canonicalization is endpoint-version-dependent, so it is pluggable the
/// same way request signing is.
pub trait WsSigner: Send + Sync {
    fn canonical_payload(&self, expires_ms: i64) -> String;
}

/// Default canonicalization for the v5 realtime endpoints.
pub struct RealtimeSigner;

impl WsSigner for RealtimeSigner {
    fn canonical_payload(&self, expires_ms: i64) -> String {
        format!("GET/realtime{}", expires_ms)
    }
}

/// Credentials plus expiry window for one private connection. Signatures
/// are time-bound, so a fresh expiry and signature are derived on every
/// authentication attempt.
pub struct AuthContext {
    api_key: Secret<String>,
    api_secret: Secret<String>,
    window: Duration,
}

impl AuthContext {
    pub fn new(api_key: String, api_secret: String, window: Duration) -> Self {
        Self {
            api_key: Secret::new(api_key),
            api_secret: Secret::new(api_secret),
            window,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        if !config.has_credentials() {
            return Err(EngineError::AuthError(
                "private endpoint requires API credentials".to_string(),
            ));
        }
        Ok(Self::new(
            config.api_key().to_string(),
            config.api_secret().to_string(),
            Duration::from_millis(config.auth_window_ms.unsigned_abs()),
        ))
    }

    /// Build the signed login frame with a fresh expiry.
    pub fn login_frame(&self, signer: &dyn WsSigner) -> Result<OutboundFrame, EngineError> {
        let expires = chrono::Utc::now().timestamp_millis() + self.window.as_millis() as i64;
        self.login_frame_at(signer, expires)
    }

    fn login_frame_at(
        &self,
        signer: &dyn WsSigner,
        expires: i64,
    ) -> Result<OutboundFrame, EngineError> {
        let payload = signer.canonical_payload(expires);

        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| EngineError::AuthError(format!("invalid secret key: {}", e)))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(OutboundFrame::Auth {
            api_key: self.api_key.expose_secret().clone(),
            expires,
            signature,
        })
    }
}

/// Performs the login handshake on a freshly opened private connection:
/// sends the signed auth frame and waits for its acknowledgement before any
/// subscription traffic is allowed.
pub struct Authenticator {
    ctx: AuthContext,
    signer: Box<dyn WsSigner>,
    ack_timeout: Duration,
}

impl Authenticator {
    pub fn new(ctx: AuthContext, ack_timeout: Duration) -> Self {
        Self {
            ctx,
            signer: Box::new(RealtimeSigner),
            ack_timeout,
        }
    }

    /// Replace the canonicalization used for the login signature.
    pub fn with_signer(mut self, signer: Box<dyn WsSigner>) -> Self {
        self.signer = signer;
        self
    }

    #[instrument(skip_all)]
    pub async fn authenticate<C: Connection>(&self, conn: &mut C) -> Result<(), EngineError> {
        let frame = self.ctx.login_frame(self.signer.as_ref())?;
        conn.send(frame).await?;

        match tokio::time::timeout(self.ack_timeout, Self::wait_for_ack(conn)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::AuthError(
                "timed out waiting for auth acknowledgement".to_string(),
            )),
        }
    }

    async fn wait_for_ack<C: Connection>(conn: &mut C) -> Result<(), EngineError> {
        loop {
            let text = conn.receive().await?.ok_or_else(|| {
                EngineError::TransportError("connection closed during authentication".to_string())
            })?;

            match parse_inbound(&text) {
                Ok(InboundFrame::Ack(ack)) if ack.op == "auth" => {
                    return if ack.success.unwrap_or(false) {
                        Ok(())
                    } else {
                        Err(EngineError::AuthError(
                            ack.ret_msg
                                .unwrap_or_else(|| "signature rejected".to_string()),
                        ))
                    };
                }
                // Heartbeats and stray frames before the auth ack are dropped;
                // no subscription exists yet that could consume them.
                Ok(_) => debug!("ignoring frame while waiting for auth ack"),
                Err(e) => debug!(error = %e, "ignoring malformed frame during auth"),
            }
        }
    }
}
