use crate::endpoint::Endpoint;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed price string: {0:?}")]
    MalformedPriceString(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Response error:\nStatusCode: {0}\nText: {1}")]
    Response(reqwest::StatusCode, String),

    #[error("Market API error: {0}")]
    Api(String),

    #[error("Rate limit still exceeded for {0} after backing off")]
    RateLimited(Endpoint),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("EnvVar error: {0}")]
    EnvVar(#[from] env::VarError),

    #[error("Couldn't convert query to string: {0}")]
    HttpQuery(#[from] serde_qs::Error),

    #[error("Parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
}

impl Error {
    /// Only transport failures are worth retrying; everything the decision core
    /// raises is a deterministic function of its inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Request(_) | Error::RateLimited(_) => true,
            Error::Response(status, _) => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_are_not_retryable() {
        assert!(!Error::InvalidArgument("price".into()).is_retryable());
        assert!(!Error::InvariantViolation("count".into()).is_retryable());
        assert!(!Error::MalformedPriceString("abc".into()).is_retryable());
    }

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(Error::RateLimited(Endpoint::PriceOverview).is_retryable());
        assert!(Error::Response(reqwest::StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!Error::Response(reqwest::StatusCode::FORBIDDEN, String::new()).is_retryable());
    }
}
