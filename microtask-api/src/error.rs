use microtask_core::TaskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Envelope `code` other than 200.
    #[error("service rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("response had no {0}")]
    MissingData(&'static str),

    #[error("not logged in; run: microtask login")]
    Unauthenticated,
}

impl From<ApiError> for TaskError {
    fn from(e: ApiError) -> Self {
        TaskError::transport(e.to_string())
    }
}
