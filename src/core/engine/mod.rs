//! Subscription-and-dispatch engine.
//!
//! Multiplexes many logical topic subscriptions over one physical
//! WebSocket connection per endpoint. The pieces are layered the same way
//! the wire works:
//!
//! - `connection`: the transport. One socket, exclusive read/write, no
//!   retry policy of its own.
//! - `codec`: `{op, args}` control frames out, discriminator-first parsing
//!   of ack/data frames in.
//! - `auth`: the signed login handshake for private endpoints, with
//!   pluggable canonicalization.
//! - `registry`: topic -> (decoder, callback) with last-registration-wins.
//! - `subscription`: subscribe/unsubscribe frames and ack tracking.
//! - `dispatcher`: routes one inbound frame to the right callback.
//! - `client`: the service handle tying it together; `step` and `run` are
//!   the two consumption modes over one state machine.
//!
//! Everything is trait-based where a test needs to reach in: the transport
//! is injected through [`Connection`], and the engine never touches the
//! socket outside it.
pub mod auth;
pub mod client;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod subscription;

// Re-export key types for convenience
pub use auth::{AuthContext, Authenticator, RealtimeSigner, WsSigner};
pub use client::WsClient;
pub use codec::{AckFrame, DataFrame, InboundFrame, OutboundFrame};
pub use connection::{Connection, TungsteniteConnection};
pub use dispatcher::DispatchOutcome;
pub use registry::{SubscriptionToken, TopicHandler, TopicRegistry};
pub use subscription::SubscriptionManager;
