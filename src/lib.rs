pub mod core;

pub use crate::core::config::{ConfigError, EngineConfig, ReconnectPolicy};
pub use crate::core::engine::{
    Connection, SubscriptionToken, TungsteniteConnection, WsClient, WsSigner,
};
pub use crate::core::errors::EngineError;
pub use crate::core::types::{
    AckState, Endpoint, EngineState, Flow, MarketSegment, StopReason, TopicKey, Visibility,
};
