//! Error values raised by the streaming session
//!
//! Every failure the session reports, whether through the `on_error` callback
//! or as a returned `Result`, is a [`ClientError`]: a discriminated
//! [`ErrorKind`], a human-readable message, and optional detail (the wrapped
//! lower-level cause and/or a JSON payload).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::audio::DeviceError;
use crate::streaming::ChannelError;

/// Name used in rendered errors
const ERROR_NAME: &str = "StreamingError";

/// Discriminated kind of a [`ClientError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfiguration,
    Network,
    Authentication,
    Keywords,
    Microphone,
    /// A recording is already running. This is a policy signal rather than a
    /// defect; callers usually ignore it.
    MicrophoneInUse,
    Streaming,
    General,
}

impl ErrorKind {
    /// Stable wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Keywords => "KEYWORDS_ERROR",
            ErrorKind::Microphone => "MIC_ERROR",
            ErrorKind::MicrophoneInUse => "MIC_ALREADY_IN_USE",
            ErrorKind::Streaming => "STREAMING_ERROR",
            ErrorKind::General => "GENERAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error reported by the streaming session
#[derive(Debug, Clone)]
pub struct ClientError {
    kind: ErrorKind,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    details: Option<Value>,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            details: None,
        }
    }

    /// Attach the lower-level error that caused this one
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Attach a structured detail payload
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Plain JSON representation, suitable for shipping to a diagnostics sink
    pub fn to_json(&self) -> Value {
        let mut details = self.details.clone().unwrap_or(Value::Null);
        if let Some(cause) = &self.cause {
            if !details.is_object() {
                details = json!({});
            }
            if let Value::Object(map) = &mut details {
                map.insert(
                    "originalError".to_string(),
                    Value::String(cause.to_string()),
                );
            }
        }

        json!({
            "name": ERROR_NAME,
            "message": self.message,
            "code": self.kind.code(),
            "details": details,
        })
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", ERROR_NAME, self.kind.code(), self.message)
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<ChannelError> for ClientError {
    fn from(error: ChannelError) -> Self {
        let kind = match &error {
            ChannelError::InitFailed(_) | ChannelError::ConnectFailed(_) => ErrorKind::Network,
            ChannelError::Rejected(_) => ErrorKind::Authentication,
            ChannelError::ProtocolError(_) => ErrorKind::General,
            ChannelError::SendFailed(_) | ChannelError::Closed => ErrorKind::Streaming,
        };
        ClientError::new(kind, error.to_string()).with_cause(error)
    }
}

impl From<DeviceError> for ClientError {
    fn from(error: DeviceError) -> Self {
        ClientError::new(ErrorKind::Microphone, error.to_string()).with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    #[test]
    fn test_display_includes_code() {
        let err = ClientError::new(ErrorKind::Network, "Socket connection error: refused");
        assert_eq!(
            err.to_string(),
            "StreamingError [NETWORK_ERROR]: Socket connection error: refused"
        );
    }

    #[test]
    fn test_to_json() {
        let err = ClientError::new(ErrorKind::Keywords, "Server error: nope")
            .with_details(json!({ "keywords": ["a"] }));
        let value = err.to_json();

        assert_eq!(value["name"], "StreamingError");
        assert_eq!(value["code"], "KEYWORDS_ERROR");
        assert_eq!(value["message"], "Server error: nope");
        assert_eq!(value["details"]["keywords"][0], "a");
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        use std::error::Error;

        let err = ClientError::new(ErrorKind::Microphone, "Failed to access microphone: boom")
            .with_cause(Boom);
        assert_eq!(err.source().map(|e| e.to_string()), Some("boom".to_string()));
        assert_eq!(err.to_json()["details"]["originalError"], "boom");
    }

    #[test]
    fn test_layer_errors_map_to_kinds() {
        let err: ClientError = ChannelError::Rejected("invalid token".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.message(), "Connection rejected: invalid token");

        let err: ClientError = ChannelError::Closed.into();
        assert_eq!(err.kind(), ErrorKind::Streaming);

        let err: ClientError = DeviceError::NoInputDevice.into();
        assert_eq!(err.kind(), ErrorKind::Microphone);
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_all_codes_distinct() {
        let kinds = [
            ErrorKind::InvalidConfiguration,
            ErrorKind::Network,
            ErrorKind::Authentication,
            ErrorKind::Keywords,
            ErrorKind::Microphone,
            ErrorKind::MicrophoneInUse,
            ErrorKind::Streaming,
            ErrorKind::General,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
