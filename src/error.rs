//! Error types for the JODI protocol

/// Errors raised by the call-identifier and storage protocols.
///
/// The first five variants follow the protocol's failure taxonomy. Only
/// [`JodiError::ProtocolFailure`] is meant to reach the caller of
/// [`crate::engine::ProtocolEngine`] as a hard failure; the others are mostly
/// produced and consumed inside a fan-out (a dropped share, a missing record,
/// an unreachable node).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JodiError {
    /// Billing token or group signature rejected by the serving node
    #[error("authorization failure: {0}")]
    AuthorizationFailure(String),
    /// VOPRF proof or audit signature did not check out
    #[error("verification failure: {0}")]
    VerificationFailure(String),
    /// Storage index absent or expired
    #[error("not found: {0}")]
    NotFound(String),
    /// No identifier could be agreed (no usable shares, empty directory)
    #[error("protocol failure: {0}")]
    ProtocolFailure(String),
    /// Timeout or connection error towards a single node
    #[error("transport failure: {0}")]
    TransportFailure(String),
    /// Invalid parameter provided (e.g. a zero fan-out width)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Wire or point encoding could not be parsed
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Underlying primitive failed (hash-to-curve, AEAD, key decoding)
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Configuration is malformed or violates a protocol constraint
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for JodiError {
    fn from(err: std::io::Error) -> Self {
        JodiError::Io(err.to_string())
    }
}

impl From<ark_serialize::SerializationError> for JodiError {
    fn from(err: ark_serialize::SerializationError) -> Self {
        JodiError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for JodiError {
    fn from(err: serde_json::Error) -> Self {
        JodiError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for JodiError {
    fn from(err: base64::DecodeError) -> Self {
        JodiError::Serialization(format!("invalid base64: {}", err))
    }
}

impl JodiError {
    /// Whether the failure is local to one node and should not abort a fan-out.
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            JodiError::AuthorizationFailure(_)
                | JodiError::VerificationFailure(_)
                | JodiError::NotFound(_)
                | JodiError::TransportFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, JodiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_local_classification() {
        assert!(JodiError::TransportFailure("timeout".into()).is_node_local());
        assert!(JodiError::NotFound("idx".into()).is_node_local());
        assert!(!JodiError::ProtocolFailure("no shares".into()).is_node_local());
        assert!(!JodiError::Config("bad".into()).is_node_local());
    }

    #[test]
    fn test_io_conversion() {
        let err: JodiError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, JodiError::Io(msg) if msg.contains("boom")));
    }
}
