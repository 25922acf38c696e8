use thiserror::Error;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum PoolError {
    // Pool errors
    #[error("No proxies provided from any provider")]
    NoProxiesAvailable,

    #[error("Too many failures for {method} {url} after {attempts} attempts, probably bad request")]
    TooManyFailures {
        method: String,
        url: String,
        attempts: u32,
    },

    #[error("Destination kept rate limiting {method} {url} after {backoffs} backoffs")]
    CongestionTimeout {
        method: String,
        url: String,
        backoffs: u32,
    },

    // Proxy address errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Provider errors
    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Whether this error ends a logical request as seen by the caller
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoolError::NoProxiesAvailable
                | PoolError::TooManyFailures { .. }
                | PoolError::CongestionTimeout { .. }
                | PoolError::InvalidRequest(_)
        )
    }
}

/// Failure of a single transport attempt through a proxy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Proxy refused, reset or could not be reached
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out")]
    Timeout,

    /// Connection dropped while the response was streaming
    #[error("connection interrupted: {0}")]
    Interrupted(String),

    /// The request could not be built or sent at all
    #[error("request error: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether the failure should count against the proxy that carried it
    pub fn is_proxy_failure(&self) -> bool {
        !matches!(self, TransportError::Request(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() || err.is_request() {
            TransportError::Interrupted(err.to_string())
        } else if err.is_builder() {
            TransportError::Request(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

impl From<reqwest::Error> for PoolError {
    fn from(err: reqwest::Error) -> Self {
        PoolError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for PoolError {
    fn from(err: url::ParseError) -> Self {
        PoolError::InvalidProxyAddress(err.to_string())
    }
}
