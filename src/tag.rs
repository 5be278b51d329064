// src/tag.rs
use crate::error::TagIoError;
use crate::types::NdefMessage;

/// What a discovered tag can do with NDEF, known at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefSupport {
    /// Holds (or can hold) an NDEF message.
    Ndef,
    /// Writable, but needs an NDEF container laid down first.
    Formatable,
    Unsupported,
}

/// A live connection to one physical tag, good for one transaction.
///
/// Every call that touches the tag may fail with `TagIoError::TagLost` when
/// the tag leaves the field. `close` must be safe to call on a handle that
/// was never connected or is already closed.
pub trait TagHandle {
    fn id(&self) -> &[u8];

    fn support(&self) -> NdefSupport;

    fn connect(&mut self) -> Result<(), TagIoError>;

    /// Only meaningful after `connect`.
    fn is_writable(&self) -> bool;

    /// Largest NDEF message, in bytes, the tag can store.
    fn max_size(&self) -> usize;

    /// `None` when the tag carries no message.
    fn read_ndef_message(&mut self) -> Result<Option<NdefMessage>, TagIoError>;

    fn write_ndef_message(&mut self, message: &NdefMessage) -> Result<(), TagIoError>;

    /// Lays down the NDEF container and writes `message` into it.
    fn format(&mut self, message: &NdefMessage) -> Result<(), TagIoError>;

    fn close(&mut self) -> Result<(), TagIoError>;
}
