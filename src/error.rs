// src/error.rs
//! Classified failures. Callers branch on these (retry a timeout, skip a source,
//! map an oracle failure to a fallback score); everything else travels as `anyhow`.

/// Failure while retrieving or parsing a source document.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("unparseable feed document: {0}")]
    Parse(String),
}

impl FetchError {
    /// Only timeouts are worth another attempt within the same cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }

    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Failure of a single call to the relevance oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle disabled")]
    Disabled,

    #[error("no API key configured")]
    MissingApiKey,

    #[error("oracle call timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {0}")]
    Status(u16),

    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Short class label used in rationales and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::Disabled => "disabled",
            OracleError::MissingApiKey => "missing_api_key",
            OracleError::Timeout => "timeout",
            OracleError::Transport(_) => "transport",
            OracleError::Status(_) => "status",
            OracleError::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OracleError::Timeout
        } else if let Some(status) = e.status() {
            OracleError::Status(status.as_u16())
        } else if e.is_decode() {
            OracleError::Malformed(e.to_string())
        } else {
            OracleError::Transport(e.to_string())
        }
    }
}
