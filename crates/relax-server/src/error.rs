use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid tenant config: {0}")]
    ConfigInvalid(String),
    #[error("no client registered under {0}")]
    NotFound(String),
    #[error("a client is already registered under {0}")]
    AlreadyRegistered(String),
    #[error("store call failed: {0}")]
    ClaimStoreUnavailable(String),
    #[error("channel transmit failed: {0}")]
    ChannelTransmitFailed(String),
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("control channel: {0}")]
    ControlSubscription(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        Self::ClaimStoreUnavailable(err.to_string())
    }
}
