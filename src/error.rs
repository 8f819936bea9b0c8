use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde_json::json;

/// Outbound request failure, classified so callers know whether another attempt is worth it.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("upstream {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_owned();
        if err.is_timeout() {
            FetchError::Timeout { url }
        } else if err.is_builder() {
            FetchError::InvalidUrl { url }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url,
                status: status.as_u16(),
            }
        } else if err.is_body() || err.is_decode() {
            FetchError::Body { url, source: err }
        } else {
            FetchError::Network { url, source: err }
        }
    }

    /// Transient failures rotate to the next proxy; the rest stop the attempt loop.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl { .. })
    }
}

/// Errors surfaced at the HTTP boundary. Only 400, 404 and 500 are produced.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing {0}")]
    MissingParam(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParam(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Upstream {
                message,
                details: Some(details),
            } => json!({ "error": message, "details": details }),
            ApiError::Internal(err) => {
                error!("[api] unexpected failure: {err:#}");
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
