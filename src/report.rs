// src/report.rs
use crate::driver::WriteOutcome;
use crate::error::NfcError;
use crate::ndef;
use crate::types::NdefMessage;

pub const NOTIFICATION_TITLE: &str = "NFC tag detected";
pub const EMPTY_TAG_CONTENT: &str = "Tag has no records";
pub const EMPTY_WRITE_TEXT: &str = "Enter the text to write";

const PREVIEW_CHARS: usize = 50;

/// Background path: only the first record is shown.
pub fn background_summary(message: &NdefMessage) -> String {
    match message.records.first() {
        Some(record) => ndef::describe_record(record),
        None => EMPTY_TAG_CONTENT.to_string(),
    }
}

/// Foreground path: every record, labelled from 1.
pub fn foreground_listing(message: &NdefMessage) -> String {
    if message.records.is_empty() {
        return EMPTY_TAG_CONTENT.to_string();
    }

    message
        .records
        .iter()
        .enumerate()
        .map(|(i, record)| format!("[{}] {}", i + 1, ndef::describe_record(record)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a background read turns into; never empty.
pub fn background_text(result: &Result<Option<NdefMessage>, NfcError>) -> String {
    match result {
        Ok(Some(message)) => background_summary(message),
        Ok(None) => NfcError::EmptyTag.to_string(),
        Err(e) => e.to_string(),
    }
}

/// First 50 characters, with an ellipsis when cut.
pub fn notification_preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

pub fn write_confirmation(outcome: WriteOutcome, message: &NdefMessage) -> String {
    let headline = match outcome {
        WriteOutcome::Written => "Message written to the tag",
        WriteOutcome::FormattedAndWritten => "Tag formatted and message written",
    };
    format!("{}\nContent: {}", headline, background_summary(message))
}
