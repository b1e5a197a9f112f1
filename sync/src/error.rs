//! Unified error handling for the sync layer.

use crate::config::ConfigError;

/// Sync layer error type.
///
/// Cloneable so that errors raised by background listeners can be fanned out
/// on a broadcast channel; foreign causes are kept as messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] tether_engine::Error),

    #[error(
        "Remote error{}: {message}",
        status.map(|s| format!(" (status {s})")).unwrap_or_default()
    )]
    Remote {
        /// HTTP status, absent for transport failures
        status: Option<u16>,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("Coordinator is already active")]
    AlreadyActive,

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// True for failures that came back from (or while talking to) the
    /// remote server. Decode failures count as remote failures.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. } | Error::Decode(_))
    }

    /// Lift an engine error raised while interpreting a response body.
    pub(crate) fn decode(err: tether_engine::Error) -> Self {
        match err {
            tether_engine::Error::Decode(message) => Error::Decode(message),
            other => Error::Decode(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Error::Decode(err.to_string());
        }
        Error::Remote {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Result type alias for the sync layer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use tether_engine::RecordIdentity;

    #[test]
    fn remote_and_decode_are_remote() {
        let remote = Error::Remote {
            status: Some(500),
            message: "boom".into(),
        };
        assert!(remote.is_remote());
        assert!(Error::Decode("bad json".into()).is_remote());
        assert!(!Error::AlreadyActive.is_remote());
        assert!(!Error::Engine(tether_engine::Error::UnknownType("x".into())).is_remote());
    }

    #[test]
    fn remote_display_includes_status() {
        let err = Error::Remote {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "Remote error (status 503): unavailable");

        let err = Error::Remote {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "Remote error: connection refused");
    }

    #[test]
    fn engine_errors_lift_to_decode() {
        let err = Error::decode(tether_engine::Error::Decode("eof".into()));
        assert!(matches!(err, Error::Decode(ref m) if m == "eof"));

        let err = Error::decode(tether_engine::Error::RecordNotFound(RecordIdentity::new(
            "planet", "1",
        )));
        assert!(matches!(err, Error::Decode(_)));
    }
}
