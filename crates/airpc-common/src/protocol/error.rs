use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("no available provider for service '{0}'")]
    NoProvider(String),

    #[error("circuit breaker '{name}' is {state} and does not permit calls")]
    CircuitOpen { name: String, state: &'static str },

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote call failed: {0}")]
    Business(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("all {attempts} attempts failed: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// Classify an IO error into the domain error space. Connection refusals
    /// get their own variant because the retry policy treats them specially.
    pub fn from_io(err: std::io::Error, peer: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => RpcError::ConnectionRefused(peer.to_string()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::NotConnected => {
                RpcError::Connection(format!("{}: connection lost ({})", peer, err))
            }
            _ => RpcError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
