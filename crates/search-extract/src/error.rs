use thiserror::Error;

/// Errors raised while obtaining or refreshing a bearer token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("oauth token endpoint returned an error response")]
    TokenRequest(#[source] reqwest::Error),
    #[error("oauth token response was missing `access_token`")]
    MissingAccessToken,
    #[error("oauth token endpoint returned malformed json")]
    MalformedResponse(#[source] reqwest::Error),
}

/// Errors raised by a single logical HTTP call, after the retry/backoff
/// schedule in [`crate::http::RetryPolicy`] has been exhausted.
///
/// `EntityTooLarge` is surfaced rather than retried in place: the Fetch
/// Engine owns the decision to bisect the window and try again.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("authentication failed (401)")]
    Auth,
    #[error("forbidden (403): {0}")]
    Forbidden(String),
    #[error("client error ({status}): {body}")]
    ClientError { status: u16, body: String },
    #[error("response entity too large")]
    EntityTooLarge,
    #[error("server error ({status}) after exhausting retries: {body}")]
    ServerError { status: u16, body: String },
    #[error("request timed out after exhausting retries")]
    Timeout,
    #[error("connection error after exhausting retries: {0}")]
    ConnectionError(String),
}

/// Errors raised by the warehouse collaborator (out of scope per spec;
/// specified only by this interface).
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("load job failed: {0}")]
    LoadFailed(String),
    #[error("watermark query failed: {0}")]
    QueryFailed(String),
}

/// Top-level error for a pipeline run. Any of these abort the run and
/// are surfaced as `PipelineSummary { status: "error", .. }`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}
