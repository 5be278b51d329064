// src/types.rs
use serde::{Deserialize, Serialize};

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingMessage {
    ReaderStatus { success: bool },
    ModeChanged { mode: DispatchMode },
    CardStatus { success: bool, message: String },
    // Background path: what the notification tray would show
    TagNotification {
        title: String,
        preview: String,
        content: String,
    },
    DataReadSuccess { record_count: usize, data: String },
    DataReadError { error: String },
    DataWriteSuccess { message: String },
    DataWriteError { error: String },
    ReaderError { error: String },
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingMessage {
    GetReaderStatus,
    StartRead,
    StartWrite { text: String },
    StopForeground,
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug, PartialEq)]
pub enum NfcCommand {
    CheckReaderStatus,
    SetMode(Dispatch),
}

/// Who receives the next discovered tag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// No client is inspecting tags; discoveries become notifications.
    #[default]
    Background,
    ForegroundRead,
    ForegroundWrite { text: String },
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchMode {
    Background,
    Read,
    Write,
}

impl Dispatch {
    pub fn mode(&self) -> DispatchMode {
        match self {
            Dispatch::Background => DispatchMode::Background,
            Dispatch::ForegroundRead => DispatchMode::Read,
            Dispatch::ForegroundWrite { .. } => DispatchMode::Write,
        }
    }
}

impl From<IncomingMessage> for NfcCommand {
    fn from(msg: IncomingMessage) -> Self {
        match msg {
            IncomingMessage::GetReaderStatus => NfcCommand::CheckReaderStatus,
            IncomingMessage::StartRead => NfcCommand::SetMode(Dispatch::ForegroundRead),
            IncomingMessage::StartWrite { text } => {
                NfcCommand::SetMode(Dispatch::ForegroundWrite { text })
            }
            IncomingMessage::StopForeground => NfcCommand::SetMode(Dispatch::Background),
        }
    }
}

/// One record as stored on the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8, // Type Name Format (How to interpret the type)
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
    pub id: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefMessage {
    pub records: Vec<NdefRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Text,
    Uri,
    Opaque,
}

/// A record decoded into something displayable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub kind: RecordKind,
    pub language_code: Option<String>,
    pub text: String,
    pub raw_bytes: Vec<u8>,
}

pub const CARD_TYPE_MIFARE_1K: &str = "6a"; // MIFARE Classic 1K
