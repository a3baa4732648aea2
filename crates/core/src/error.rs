//! Error taxonomy for remote speech and language capabilities.

use reqwest::StatusCode;

/// A failure from an external capability call.
///
/// The transient/non-transient split drives the gate's retry decision:
/// rate limits, outages and transport errors are worth retrying with
/// backoff, while bad requests and auth failures never are.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("rate limited by upstream service")]
    RateLimited,
    #[error("upstream service unavailable")]
    Unavailable,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream returned status {status}")]
    Http { status: u16 },
    #[error("unusable upstream response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the gate should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited | RemoteError::Unavailable | RemoteError::Transport(_)
        )
    }

    /// Classifies a non-success HTTP status from an upstream API.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE => RemoteError::Unavailable,
            other => RemoteError::Http {
                status: other.as_u16(),
            },
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError::from_status(status),
            None => RemoteError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_outage_are_transient() {
        assert!(RemoteError::RateLimited.is_transient());
        assert!(RemoteError::Unavailable.is_transient());
        assert!(RemoteError::Transport("connection reset".into()).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!RemoteError::Http { status: 400 }.is_transient());
        assert!(!RemoteError::Http { status: 401 }.is_transient());
        assert!(!RemoteError::InvalidResponse("empty body".into()).is_transient());
    }

    #[test]
    fn status_classification_maps_retryable_codes() {
        assert!(matches!(
            RemoteError::from_status(StatusCode::TOO_MANY_REQUESTS),
            RemoteError::RateLimited
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::SERVICE_UNAVAILABLE),
            RemoteError::Unavailable
        ));
        assert!(matches!(
            RemoteError::from_status(StatusCode::NOT_FOUND),
            RemoteError::Http { status: 404 }
        ));
    }
}
