use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange error: {0}")]
    Api(String),

    #[error("unexpected ticker response: {0}")]
    Parse(String),

    #[error("no ticker returned for {0}")]
    MissingPair(String),

    #[error("price fetch timed out after {0}s")]
    Timeout(u64),
}

impl FeedError {
    /// Short tag for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Http(_) => "http",
            FeedError::Api(_) => "api",
            FeedError::Parse(_) => "parse",
            FeedError::MissingPair(_) => "missing_pair",
            FeedError::Timeout(_) => "timeout",
        }
    }
}

/// Source of the current price for a symbol
///
/// Failures are expected and transient; callers skip the cycle and retry on
/// the next tick.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<f64, FeedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(FeedError::Timeout(10).kind(), "timeout");
        assert_eq!(FeedError::MissingPair("X".into()).kind(), "missing_pair");
        assert_eq!(
            FeedError::Api("EGeneral:Too many requests".into()).to_string(),
            "exchange error: EGeneral:Too many requests"
        );
    }
}
