//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use super::Scope;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the node runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope bytes (bad gzip stream or undecodable envelope).
    #[error("decode error: {0}")]
    Decode(String),

    /// No binding for the origin node and no default handler.
    #[error("missing handler for node {0:?}")]
    MissingHandler(String),

    /// Failure returned by user handler code.
    #[error("handler error: {0}")]
    Handler(String),

    /// Encoded envelope exceeds the transport limit even after compression.
    #[error("message too big: {size} bytes exceeds max of {max} bytes")]
    MessageTooBig { size: usize, max: usize },

    /// Object store operation without a configured bucket.
    #[error("undefined object store")]
    UndefinedStore,

    /// Object store save without payload bytes.
    #[error("empty payload")]
    EmptyPayload,

    /// Key missing from an explicitly requested scope.
    #[error("key {key:?} not found in {scope} scope")]
    NotFound { key: String, scope: Scope },

    /// Object key missing from the object store bucket.
    #[error("object {0:?} not found")]
    ObjectNotFound(String),

    /// Key missing from every scope of the fallback search.
    #[error("key {0:?} not found in any scope")]
    NotFoundAnyScope(String),

    /// Second attempt to answer the original caller for a request.
    #[error("request {0} was already replied")]
    AlreadyReplied(String),

    /// Invalid arguments or configuration values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Bus connectivity, publish, subscribe or request failures.
    #[error("bus error: {0}")]
    Bus(String),

    /// KV or object bucket backend failures.
    #[error("storage error: {0}")]
    Storage(String),

    /// Metrics sink failures.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code, used as a log field and metrics tag.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Decode(_) => "DECODE_ERROR",
            Error::MissingHandler(_) => "MISSING_HANDLER",
            Error::Handler(_) => "HANDLER_ERROR",
            Error::MessageTooBig { .. } => "MESSAGE_TOO_BIG",
            Error::UndefinedStore => "UNDEFINED_STORE",
            Error::EmptyPayload => "EMPTY_PAYLOAD",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            Error::NotFoundAnyScope(_) => "NOT_FOUND_ANY_SCOPE",
            Error::AlreadyReplied(_) => "ALREADY_REPLIED",
            Error::Validation(_) => "VALIDATION",
            Error::Config(_) => "CONFIG",
            Error::Bus(_) => "BUS",
            Error::Storage(_) => "STORAGE",
            Error::Metrics(_) => "METRICS",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }

    /// True for the store-layer "key absent" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::ObjectNotFound(_) | Error::NotFoundAnyScope(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn bus(msg: impl Into<String>) -> Self {
        Self::Bus(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Metrics(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::MessageTooBig { size: 2048, max: 1024 };
        assert_eq!(
            err.to_string(),
            "message too big: 2048 bytes exceeds max of 1024 bytes"
        );

        let err = Error::NotFound {
            key: "threshold".to_string(),
            scope: Scope::Workflow,
        };
        assert_eq!(err.to_string(), "key \"threshold\" not found in workflow scope");

        let err = Error::MissingHandler("nodeZ".to_string());
        assert!(err.to_string().contains("nodeZ"));
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::decode("x").code(), "DECODE_ERROR");
        assert_eq!(Error::UndefinedStore.code(), "UNDEFINED_STORE");
        assert_eq!(Error::EmptyPayload.code(), "EMPTY_PAYLOAD");
        assert_eq!(Error::handler("boom").code(), "HANDLER_ERROR");
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFoundAnyScope("k".into()).is_not_found());
        assert!(!Error::storage("down").is_not_found());
    }
}
