use std::fmt;

/// Failures raised by the source platform client.
///
/// `Auth` and `Protocol` abort the whole run; `Fetch` is scoped to a single
/// activity and the orchestrator skips past it.
#[derive(Debug)]
pub enum SourceError {
    /// Bad credentials or an expired refresh token. Terminal, never retried.
    Auth(String),
    /// The server responded with a shape we refuse to interpret, for example
    /// a pagination loop that never terminates.
    Protocol(String),
    /// A single activity detail could not be fetched.
    Fetch(String),
    Network(reqwest::Error),
    Serialization(serde_json::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Auth(msg) => write!(f, "authentication failed: {msg}"),
            SourceError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            SourceError::Fetch(msg) => write!(f, "fetch failed: {msg}"),
            SourceError::Network(e) => write!(f, "network error: {e}"),
            SourceError::Serialization(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    /// True for errors that must abort the run rather than skip one activity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Auth(_) | SourceError::Protocol(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Serialization(err)
    }
}
