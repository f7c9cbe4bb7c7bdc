//! Error types for the proxy.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    /// Malformed JSON body or stream chunk.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// A Responses-session item whose `type` is not understood.
    #[error("Unrecognized item type: {item_type}")]
    UnrecognizedItemType { item_type: String },

    /// An error object embedded in an upstream stream chunk.
    #[error("Upstream protocol error: {message}")]
    UpstreamProtocol { message: String },

    /// Read or write failure on a live byte stream.
    #[error("Transport disconnect: {message}")]
    TransportDisconnect { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn unrecognized_item(item_type: impl Into<String>) -> Self {
        Self::UnrecognizedItemType {
            item_type: item_type.into(),
        }
    }

    pub fn upstream_protocol(msg: impl Into<String>) -> Self {
        Self::UpstreamProtocol {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportDisconnect {
            message: msg.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error looks like the peer hanging up mid-stream.
    #[must_use]
    pub fn is_client_disconnect(&self) -> bool {
        match self {
            Self::TransportDisconnect { message } => is_disconnect_message(message),
            Self::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::UnexpectedEof
                ) || is_disconnect_message(&e.to_string())
            }
            Self::Http(e) => is_disconnect_message(&e.to_string()),
            _ => false,
        }
    }
}

/// Match the transport messages that mean "the other side went away".
pub fn is_disconnect_message(message: &str) -> bool {
    const NEEDLES: [&str; 5] = [
        "broken pipe",
        "connection reset",
        "unexpected eof",
        "unexpected end of",
        "channel closed",
    ];
    let message = message.to_ascii_lowercase();
    NEEDLES.iter().any(|needle| message.contains(needle))
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_messages() {
        assert!(is_disconnect_message("write: Broken pipe (os error 32)"));
        assert!(is_disconnect_message("Connection reset by peer"));
        assert!(is_disconnect_message("unexpected EOF during chunk size line"));
        assert!(!is_disconnect_message("timed out"));
    }

    #[test]
    fn test_io_kind_counts_as_disconnect() {
        let err = ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "peer gone",
        ));
        assert!(err.is_client_disconnect());
        assert!(!ProxyError::decode("bad json").is_client_disconnect());
    }
}
