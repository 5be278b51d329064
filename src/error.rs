// src/error.rs
use thiserror::Error;

/// Failure reported by the hardware layer for a single tag call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagIoError {
    #[error("tag was removed")]
    TagLost,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("malformed NDEF data: {0}")]
    Format(String),
}

impl From<pcsc::Error> for TagIoError {
    fn from(err: pcsc::Error) -> Self {
        match err {
            pcsc::Error::RemovedCard | pcsc::Error::NoSmartcard => TagIoError::TagLost,
            other => TagIoError::Io(other.to_string()),
        }
    }
}

/// Outcome of a tag transaction that did not succeed. The `Display` text is
/// what gets shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NfcError {
    #[error("NFC tag not found")]
    NoTagPresent,

    #[error("This tag does not support NDEF")]
    NotNdefCapable,

    #[error("The tag is empty (no NDEF message)")]
    EmptyTag,

    #[error("Could not connect to the tag: {0}")]
    ConnectionFailed(String),

    #[error("Tag lost. Keep the tag against the reader and try again")]
    TagLost,

    #[error("I/O error while talking to the tag: {0}")]
    Io(String),

    #[error("This tag is read-only")]
    ReadOnlyTag,

    #[error("Not enough space on the tag: {required} bytes needed, {available} available")]
    InsufficientCapacity { required: usize, available: usize },

    #[error("NDEF format error: {0}")]
    Format(String),

    #[error("Language code is {length} bytes long, at most 63 are allowed")]
    InvalidLanguageCode { length: usize },
}

impl NfcError {
    /// Maps a failed `connect()` call. A tag that leaves during the attempt
    /// stays a `TagLost`.
    pub fn from_connect(err: TagIoError) -> Self {
        match err {
            TagIoError::TagLost => NfcError::TagLost,
            TagIoError::Io(msg) | TagIoError::Format(msg) => NfcError::ConnectionFailed(msg),
        }
    }
}

impl From<TagIoError> for NfcError {
    fn from(err: TagIoError) -> Self {
        match err {
            TagIoError::TagLost => NfcError::TagLost,
            TagIoError::Io(msg) => NfcError::Io(msg),
            TagIoError::Format(msg) => NfcError::Format(msg),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_card_maps_to_tag_lost() {
        assert_eq!(TagIoError::from(pcsc::Error::RemovedCard), TagIoError::TagLost);
        assert_eq!(TagIoError::from(pcsc::Error::NoSmartcard), TagIoError::TagLost);
        assert!(matches!(
            TagIoError::from(pcsc::Error::Timeout),
            TagIoError::Io(_)
        ));
    }

    #[test]
    fn connect_failures_keep_tag_lost() {
        assert_eq!(NfcError::from_connect(TagIoError::TagLost), NfcError::TagLost);
        assert_eq!(
            NfcError::from_connect(TagIoError::Io("busy".into())),
            NfcError::ConnectionFailed("busy".into())
        );
    }

    #[test]
    fn capacity_message_reports_both_sizes() {
        let msg = NfcError::InsufficientCapacity {
            required: 12,
            available: 10,
        }
        .to_string();
        assert!(msg.contains("12 bytes needed"));
        assert!(msg.contains("10 available"));
    }
}
