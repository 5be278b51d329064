// src/driver.rs
//
// One read or write transaction against a tag handle:
//
//   Idle -> Connected -> ReadDone | WriteDone | Failed -> Closed
//
// The handle is closed exactly once on every path, including early refusals.
use log::{debug, info, warn};

use crate::error::NfcError;
use crate::ndef;
use crate::tag::{NdefSupport, TagHandle};
use crate::types::NdefMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Connected,
    ReadDone,
    WriteDone,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    FormattedAndWritten,
}

struct Transaction<'a, H: TagHandle + ?Sized> {
    handle: &'a mut H,
    state: TransactionState,
}

impl<'a, H: TagHandle + ?Sized> Transaction<'a, H> {
    fn begin(handle: &'a mut H) -> Self {
        Transaction {
            handle,
            state: TransactionState::Idle,
        }
    }

    fn transition(&mut self, next: TransactionState) {
        debug!(
            "Tag {}: {:?} -> {:?}",
            hex::encode(self.handle.id()),
            self.state,
            next
        );
        self.state = next;
    }

    fn connect(&mut self) -> Result<(), NfcError> {
        self.handle.connect().map_err(NfcError::from_connect)?;
        self.transition(TransactionState::Connected);
        Ok(())
    }

    fn read(&mut self) -> Result<Option<NdefMessage>, NfcError> {
        if self.handle.support() != NdefSupport::Ndef {
            return Err(NfcError::NotNdefCapable);
        }

        self.connect()?;
        let message = self.handle.read_ndef_message()?;
        self.transition(TransactionState::ReadDone);
        Ok(message)
    }

    fn write(&mut self, message: &NdefMessage) -> Result<WriteOutcome, NfcError> {
        let support = self.handle.support();
        if support == NdefSupport::Unsupported {
            return Err(NfcError::NotNdefCapable);
        }

        self.connect()?;

        if !self.handle.is_writable() {
            return Err(NfcError::ReadOnlyTag);
        }

        let required = message.byte_len();
        let available = self.handle.max_size();
        if required > available {
            return Err(NfcError::InsufficientCapacity {
                required,
                available,
            });
        }

        let outcome = if support == NdefSupport::Ndef {
            self.handle.write_ndef_message(message)?;
            WriteOutcome::Written
        } else {
            self.handle.format(message)?;
            WriteOutcome::FormattedAndWritten
        };

        self.transition(TransactionState::WriteDone);
        Ok(outcome)
    }

    fn settle<T>(&mut self, result: Result<T, NfcError>) -> Result<T, NfcError> {
        if let Err(e) = &result {
            warn!("Tag transaction failed: {}", e);
            self.transition(TransactionState::Failed);
        }
        result
    }

    fn close(&mut self) {
        if self.state == TransactionState::Closed {
            return;
        }
        if let Err(e) = self.handle.close() {
            warn!("Error closing tag: {}", e);
        }
        self.transition(TransactionState::Closed);
    }
}

impl<H: TagHandle + ?Sized> Drop for Transaction<'_, H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads the tag's NDEF message. `Ok(None)` means the tag is present but
/// empty.
pub fn read_tag<H: TagHandle + ?Sized>(handle: &mut H) -> Result<Option<NdefMessage>, NfcError> {
    let mut tx = Transaction::begin(handle);
    let result = tx.read();
    tx.settle(result)
}

pub fn write_tag<H: TagHandle + ?Sized>(
    handle: &mut H,
    message: &NdefMessage,
) -> Result<WriteOutcome, NfcError> {
    let mut tx = Transaction::begin(handle);
    let result = tx.write(message);
    let result = tx.settle(result);
    if let Ok(outcome) = &result {
        info!("Tag {} written ({:?})", hex::encode(tx.handle.id()), outcome);
    }
    result
}

/// Encodes a text record and writes it. An invalid language code fails
/// before any tag I/O; the handle is still closed.
pub fn write_text<H: TagHandle + ?Sized>(
    handle: &mut H,
    language_code: &str,
    text: &str,
) -> Result<(NdefMessage, WriteOutcome), NfcError> {
    let message = match ndef::encode_text_message(language_code, text) {
        Ok(message) => message,
        Err(e) => {
            let mut tx = Transaction::begin(handle);
            return tx.settle(Err(e));
        }
    };
    let outcome = write_tag(handle, &message)?;
    Ok((message, outcome))
}
