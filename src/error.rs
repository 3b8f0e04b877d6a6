use std::fmt;
use thiserror::Error;

/// Failure reported by a price history source for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("rate limited by provider (HTTP {0})")]
    Throttled(u16),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Why an instrument was left out of a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("52-week high is {high}, fall percentage is undefined")]
    DegenerateHigh { high: f64 },
}

/// Per-instrument warning handed back to the caller alongside the records.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipWarning {
    pub symbol: String,
    pub cause: SkipCause,
}

impl fmt::Display for SkipWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error fetching {}: {}", self.symbol, self.cause)
    }
}
