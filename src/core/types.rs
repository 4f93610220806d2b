use std::fmt;

/// Default production WebSocket host.
pub const MAINNET_WS_URL: &str = "wss://stream.bybit.com";
/// Default testnet WebSocket host.
pub const TESTNET_WS_URL: &str = "wss://stream-testnet.bybit.com";

/// Realtime protocol version. Determines the path segment of the endpoint
/// URL and which auth canonicalization applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V5,
}

impl ProtocolVersion {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::V5 => "v5",
        }
    }
}

/// Market segment served by a public endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketSegment {
    Spot,
    Linear,
    Inverse,
    Options,
}

impl MarketSegment {
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
            Self::Inverse => "inverse",
            Self::Options => "option",
        }
    }
}

/// Endpoint visibility. Private endpoints require an authentication
/// handshake before any subscription traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
}

/// Immutable descriptor of one realtime endpoint. Each service handle owns
/// exactly one connection to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    version: ProtocolVersion,
    kind: EndpointKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EndpointKind {
    Public(MarketSegment),
    Private,
}

impl Endpoint {
    /// Public market-data endpoint for the given segment.
    pub const fn public(segment: MarketSegment) -> Self {
        Self {
            version: ProtocolVersion::V5,
            kind: EndpointKind::Public(segment),
        }
    }

    /// Private account-data endpoint.
    pub const fn private() -> Self {
        Self {
            version: ProtocolVersion::V5,
            kind: EndpointKind::Private,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self.kind {
            EndpointKind::Public(_) => Visibility::Public,
            EndpointKind::Private => Visibility::Private,
        }
    }

    pub fn is_private(&self) -> bool {
        self.visibility() == Visibility::Private
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Render the full wss URL against a host base.
    pub fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let version = self.version.path_segment();
        match self.kind {
            EndpointKind::Public(segment) => {
                format!("{}/{}/public/{}", base, version, segment.path_segment())
            }
            EndpointKind::Private => format!("{}/{}/private", base, version),
        }
    }
}

/// Value identity of one subscription: channel name plus ordered
/// discriminating parameters (symbol, depth, category).
///
/// The dotted wire form (`orderbook.50.BTCUSDT`) is produced by
/// [`TopicKey::topic`] and is what the exchange echoes back in data frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    channel: String,
    params: Vec<String>,
}

impl TopicKey {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: Vec::new(),
        }
    }

    /// Append a discriminating parameter. Order is significant.
    pub fn param(mut self, param: impl ToString) -> Self {
        self.params.push(param.to_string());
        self
    }

    /// Split a raw wire topic back into a key. The first dotted segment is
    /// the channel name, the rest are parameters.
    pub fn parse(raw: &str) -> Self {
        let mut segments = raw.split('.');
        let channel = segments.next().unwrap_or_default().to_string();
        Self {
            channel,
            params: segments.map(str::to_string).collect(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Dotted wire form used in subscribe frames and frame routing.
    pub fn topic(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel)?;
        for param in &self.params {
            write!(f, ".{}", param)?;
        }
        Ok(())
    }
}

/// Outcome a callback hands back to the run mode: keep consuming frames or
/// stop the loop. Stopping is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Acknowledgement state of one subscription entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Active,
    Failed,
}

/// Lifecycle of a service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Authenticating,
    Subscribing,
    Active,
    Stopped,
    Failed,
}

/// Why a managed loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation signal fired.
    Cancelled,
    /// A callback returned [`Flow::Stop`].
    Callback,
}
