use thiserror::Error;

/// Errors raised synchronously, before any network I/O begins.
///
/// Anything that can go wrong once a request is on the wire is a
/// [`CallError`] and ends up as status fields on the returned envelope.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("invalid endpoint {0}: {1}")]
    Endpoint(String, url::ParseError),
    #[error("invalid socket address: {0}")]
    Address(String),
    #[error("server error: {0}")]
    Server(#[from] warp::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid key: {0}")]
    Key(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("external ip lookup failed: {0}")]
    ExternalIp(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single call. Converted to `dendrite.status_code` /
/// `dendrite.status_message` on the envelope, never returned to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("Service at {endpoint}/{name} unavailable.")]
    Unavailable { endpoint: String, name: String },
    #[error("Timedout after {0} seconds.")]
    Timeout(f64),
    #[error("Failed to parse response object with error: {0}")]
    Parse(String),
}

impl CallError {
    pub fn status_code(&self) -> u16 {
        match self {
            CallError::Unavailable { .. } => 503,
            CallError::Timeout(_) => 408,
            CallError::Parse(_) => 422,
        }
    }

    /// Sort a transport error into the call failure taxonomy.
    ///
    /// `endpoint` is `ip:port` of the target and `name` the synapse name, both
    /// only used for the message.
    pub fn classify(err: &reqwest::Error, endpoint: &str, name: &str, timeout: f64) -> Self {
        if err.is_timeout() {
            CallError::Timeout(timeout)
        } else if err.is_connect() {
            CallError::Unavailable {
                endpoint: endpoint.to_string(),
                name: name.to_string(),
            }
        } else {
            CallError::Parse(err.to_string())
        }
    }
}

/// Reasons an axon refuses an incoming envelope.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AxonError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),
    #[error("Request addressed to {0}, not this axon")]
    WrongRecipient(String),
    #[error("Signature mismatch with {0}")]
    BadSignature(String),
    #[error("Public key does not match hotkey {0}")]
    PubkeyMismatch(String),
    #[error("Nonce {nonce} is not greater than the last seen nonce {last}")]
    StaleNonce { nonce: u64, last: u64 },
    #[error("Body hash mismatch")]
    BodyHash,
    #[error("Hotkey {0} is blacklisted")]
    Blacklisted(String),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Internal server error: {0}")]
    Handler(String),
}

impl AxonError {
    pub fn status_code(&self) -> u16 {
        match self {
            AxonError::MissingHeader(_) | AxonError::BodyHash | AxonError::InvalidBody(_) => 400,
            AxonError::WrongRecipient(_)
            | AxonError::BadSignature(_)
            | AxonError::PubkeyMismatch(_)
            | AxonError::StaleNonce { .. } => 401,
            AxonError::Blacklisted(_) => 403,
            AxonError::Handler(_) => 500,
        }
    }
}
