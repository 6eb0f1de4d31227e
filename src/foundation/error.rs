use std::path::{Path, PathBuf};

/// Convenience result type used across imgseq.
pub type ImgseqResult<T> = Result<T, ImgseqError>;

/// Top-level error taxonomy. Every variant is terminal for an encode session.
#[derive(thiserror::Error, Debug)]
pub enum ImgseqError {
    /// Invalid or unsupported encode parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input image could not be read or decoded.
    #[error("decode error: '{}': {message}", path.display())]
    Decode {
        /// Offending input file.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// An encoder or muxer invariant was broken.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Container write failure.
    #[error("mux error: {0}")]
    Mux(String),

    /// Filesystem access failure.
    #[error("io error: {context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The session was cancelled before completion.
    #[error("encode cancelled")]
    Cancelled,

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable, machine-readable error kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigurationError,
    DecodeError,
    ProtocolViolation,
    MuxError,
    IoError,
    Cancelled,
    InternalError,
}

impl ErrorKind {
    /// Stable string form, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigurationError => "configuration_error",
            Self::DecodeError => "decode_error",
            Self::ProtocolViolation => "protocol_violation",
            Self::MuxError => "mux_error",
            Self::IoError => "io_error",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ImgseqError {
    /// Build an [`ImgseqError::Configuration`] value.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build an [`ImgseqError::Decode`] value.
    pub fn decode(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Decode {
            path: path.as_ref().to_path_buf(),
            message: msg.into(),
        }
    }

    /// Build an [`ImgseqError::ProtocolViolation`] value.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Build an [`ImgseqError::Mux`] value.
    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux(msg.into())
    }

    /// Build an [`ImgseqError::Io`] value.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::ConfigurationError,
            Self::Decode { .. } => ErrorKind::DecodeError,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::Mux(_) => ErrorKind::MuxError,
            Self::Io { .. } => ErrorKind::IoError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other(_) => ErrorKind::InternalError,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
