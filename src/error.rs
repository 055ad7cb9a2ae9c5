use std::time::Duration;
use thiserror::Error;

/// Failure of a single page fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
}

impl FetchError {
    /// Gone pages stay gone; everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::HttpStatus(404 | 410))
    }
}

/// The page arrived but could not be turned into a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("markup is not valid UTF-8 (first bad byte at {0})")]
    NotUtf8(usize),
    #[error("markup is empty")]
    Empty,
}

/// Terminal failures of a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("origin unreachable: all {attempted} search queries failed")]
    OriginUnreachable { attempted: usize },
    #[error("robots.txt disallows {0}")]
    RobotsDisallowed(String),
    #[error("run cancelled before any search query completed")]
    Cancelled,
}
