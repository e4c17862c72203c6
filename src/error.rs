use thiserror::Error;

pub type Result<T> = std::result::Result<T, RadarError>;

#[derive(Debug, Error)]
pub enum RadarError {
    #[error("network error: {0}")]
    Net(#[from] RpcError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("malformed response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("{context} timed out after {waited_ms}ms")]
    Timeout { context: String, waited_ms: u64 },
    #[error("no endpoints configured for network `{0}`")]
    NoEndpoints(String),
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),
    #[error("price feed failure for {ticker}: {message}")]
    Price { ticker: String, message: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite {context} failed for {path}: {message}")]
    Sqlite {
        context: String,
        path: String,
        message: String,
    },
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: String, message: String },
    #[error("storage task for {context} did not finish: {message}")]
    Worker { context: String, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl RpcError {
    pub fn transport(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            message: crate::utils::error::compact_error_message(&err.to_string(), 260),
        }
    }

    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Rate-limit responses are the only transport failures worth a longer cooldown.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Transport { message, .. } => {
                crate::utils::rpc::is_rate_limited_rpc_error(message)
            }
            _ => false,
        }
    }
}
