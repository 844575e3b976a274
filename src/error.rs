//! Error types for the tile-caching core

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the tile-caching core.
///
/// Each variant carries the HTTP status it maps to (§7); `status_code`
/// exposes that mapping for callers that don't need the full `IntoResponse`
/// machinery (e.g. the KML/WMS error-envelope formatters).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed URL, unknown layer/grid/format (400)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Tile outside limits, cache miss in non-blocking mode, unknown tileset (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Reverse-proxy body exceeds max_post_length (413)
    #[error("entity too large: {size} bytes (max {max})")]
    EntityTooLarge { size: usize, max: usize },

    /// Unsupported HTTP method for this service (405)
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Source returned a non-image body, or any upstream HTTP failure (502)
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Configuration bug or unexpected I/O failure (500)
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration is invalid or refers to an unknown name
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the filesystem cache backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite-backed cache error (SQLite and MBTiles backends)
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Redis-backed cache/locker error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// PostgreSQL-backed dimension error
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// HTTP client error talking to a source or REST object store
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Raster codec error (PNG/JPEG encode or decode)
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration XML parse error
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Dimension value rejected by its validator
    #[error("invalid dimension value for {dimension}: {value}")]
    InvalidDimension { dimension: String, value: String },

    /// Requested zoom level outside the grid-link's configured window
    #[error("invalid zoom level: {zoom} (min: {min}, max: {max})")]
    InvalidZoom { zoom: u16, min: u16, max: u16 },

    /// Grid construction violated an invariant (resolutions, extent, etc.)
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// A lock could not be acquired before its timeout elapsed
    #[error("lock timed out on resource {0}")]
    LockTimeout(String),

    /// Catch-all, used sparingly at binary boundaries
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The HTTP status this error maps to (§7).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_)
            | Error::InvalidDimension { .. }
            | Error::InvalidZoom { .. }
            | Error::Config(_)
            | Error::InvalidGrid(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::EntityTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::UpstreamError(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `true` if a retry wrapper (§4.2) should treat this as transient and
    /// retry; configuration and request errors are not retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Sqlite(_) | Error::Redis(_) | Error::Http(_) | Error::Postgres(_)
        )
    }

    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Error::InvalidRequest(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Error::UpstreamError(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Renders as the plain-text error envelope (§6); service-specific
/// formatters (WMS `ServiceExceptionReport`, WMTS OWS `ExceptionReport`)
/// wrap this in `crate::service`.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_string();
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec() {
        assert_eq!(
            Error::invalid_request("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::not_found("missing").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::EntityTooLarge { size: 1, max: 0 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            Error::upstream("bad gateway").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::internal("oops").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_transient());
        assert!(!Error::invalid_request("x").is_transient());
    }
}
