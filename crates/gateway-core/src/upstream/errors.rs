use thiserror::Error;

/// Errors that can occur when talking to an upstream RPC provider.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured deadline.
    #[error("request timeout")]
    Timeout,

    /// Failed to establish a connection to the upstream endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Upstream answered with a non-success HTTP status code.
    #[error("http error: status {0}")]
    Http(u16),

    /// The buffered request body could not be rewritten for this target
    /// (gzip or gunzip failure during compression negotiation).
    #[error("request rewrite failed: {0}")]
    RequestRewrite(String),

    /// Response from upstream could not be parsed or had an unexpected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Target configuration carries a URL that does not parse.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// The underlying HTTP client could not be built.
    #[error("http client build failed: {0}")]
    ClientBuild(String),
}

impl UpstreamError {
    /// Collapses a `reqwest` transport error into the small set of kinds the
    /// dispatcher and prober care about. Error text is reduced to a category
    /// so upstream URLs and addresses never leak into logs or metrics.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::ConnectionFailed("connection refused or unreachable".to_string())
        } else if error.is_body() || error.is_decode() {
            Self::InvalidResponse("response body error".to_string())
        } else {
            Self::ConnectionFailed("network error".to_string())
        }
    }

    /// Returns `true` if this error should move the traversal to the next
    /// candidate target (transport failures and 5xx / 429 responses).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionFailed(_) => true,
            Self::Http(status) => (500..=599).contains(status) || *status == 429,
            _ => false,
        }
    }
}
