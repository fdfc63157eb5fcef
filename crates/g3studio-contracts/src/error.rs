use thiserror::Error;

/// Coarse failure class used by the surface to decide how a failure is reported
/// and whether a retry is ever considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Parse,
    Http,
    Transport,
    ImageRead,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Parse => "parse",
            Self::Http => "http",
            Self::Transport => "transport",
            Self::ImageRead => "image_read",
            Self::Storage => "storage",
        }
    }
}

/// Transport-level failure category as reported by the HTTP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCategory {
    Connect,
    Timeout,
    Request,
    Body,
    Decode,
    Other,
}

impl TransportCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Request => "request",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Other => "other",
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("API key is required")]
    MissingCredential,

    #[error("request body must not be empty in json mode")]
    EmptyJsonBody,

    #[error("invalid host URL: {0}")]
    InvalidHost(String),

    #[error("preset name must not be empty")]
    EmptyPresetName,

    #[error("JSON parse failed: {0}")]
    InvalidJson(String),

    #[error("malformed data URI")]
    MalformedDataUri,

    #[error("request failed: {message}")]
    Http { status: u16, message: String },

    #[error("network failure ({}): {message}", category.as_str())]
    Transport {
        category: TransportCategory,
        message: String,
    },

    #[error("image read failed for {name}: {reason}")]
    ImageRead { name: String, reason: String },

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("preset import failed: {0}")]
    PresetImport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn invalid_json(err: &serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }

    pub fn transport(category: TransportCategory, message: impl Into<String>) -> Self {
        Self::Transport {
            category,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential
            | Self::EmptyJsonBody
            | Self::InvalidHost(_)
            | Self::EmptyPresetName => ErrorKind::Validation,
            Self::InvalidJson(_)
            | Self::MalformedDataUri
            | Self::Base64(_)
            | Self::PresetImport(_) => ErrorKind::Parse,
            Self::Http { .. } => ErrorKind::Http,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::ImageRead { .. } => ErrorKind::ImageRead,
            Self::Io(_) | Self::Json(_) => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientError, ErrorKind, TransportCategory};

    #[test]
    fn validation_errors_block_before_io() {
        assert_eq!(ClientError::MissingCredential.kind(), ErrorKind::Validation);
        assert_eq!(ClientError::EmptyJsonBody.kind(), ErrorKind::Validation);
    }

    #[test]
    fn invalid_json_carries_parser_message() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let wrapped = ClientError::invalid_json(&err);
        assert_eq!(wrapped.kind(), ErrorKind::Parse);
        assert!(wrapped.to_string().contains("key must be a string"));
    }

    #[test]
    fn transport_display_names_category() {
        let err = ClientError::transport(TransportCategory::Connect, "connection reset");
        assert_eq!(
            err.to_string(),
            "network failure (connect): connection reset"
        );
    }
}
