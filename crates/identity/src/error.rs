use thiserror::Error;

/// Failures talking to the identity provider.
///
/// A missing identity is not an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider is not configured: {0}")]
    Configuration(String),

    #[error("identity provider call timed out")]
    Timeout,

    #[error("identity provider transport error: {0}")]
    Transport(String),

    #[error("identity provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode identity provider response: {0}")]
    Decode(String),

    #[error("failed to acquire service token: {0}")]
    Token(String),
}

impl IdentityError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, IdentityError::Timeout)
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IdentityError::Timeout
        } else if err.is_decode() {
            IdentityError::Decode(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;
