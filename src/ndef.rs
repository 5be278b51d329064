// src/ndef.rs
use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;
use thiserror::Error;

use crate::error::{NfcError, TagIoError};
use crate::types::{NdefMessage, NdefRecord, RecordKind, TagRecord};

pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const RTD_TEXT: &[u8] = b"T";
pub const RTD_URI: &[u8] = b"U";

/// Six bits of the status byte hold the language code length.
pub const MAX_LANGUAGE_CODE_LEN: usize = 63;

const STATUS_UTF16: u8 = 0x80;
const STATUS_LANG_LEN_MASK: u8 = 0x3F;

// Record header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

// Type 2 tag TLV blocks
const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

lazy_static! {
    static ref URI_PREFIXES: HashMap<u8, &'static str> = {
        let mut m = HashMap::new();
        m.insert(0x00, "");
        m.insert(0x01, "http://www.");
        m.insert(0x02, "https://www.");
        m.insert(0x03, "http://");
        m.insert(0x04, "https://");
        m.insert(0x05, "tel:");
        m.insert(0x06, "mailto:");
        m.insert(0x1D, "file://");
        m
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordDecodeError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("language code length {declared} exceeds the {available} bytes after the status byte")]
    LanguageCodeOutOfRange { declared: usize, available: usize },
}

/// Unknown codes resolve to no prefix.
pub fn uri_prefix(code: u8) -> &'static str {
    URI_PREFIXES.get(&code).copied().unwrap_or("")
}

pub fn decode_record(record: &NdefRecord) -> Result<TagRecord, RecordDecodeError> {
    let payload = &record.payload;

    if record.tnf == TNF_WELL_KNOWN && record.record_type == RTD_TEXT {
        let status_byte = *payload.first().ok_or(RecordDecodeError::EmptyPayload)?;
        let lang_len = (status_byte & STATUS_LANG_LEN_MASK) as usize;
        let text_start = 1 + lang_len;
        if text_start > payload.len() {
            return Err(RecordDecodeError::LanguageCodeOutOfRange {
                declared: lang_len,
                available: payload.len() - 1,
            });
        }

        let text_bytes = &payload[text_start..];
        let text = if status_byte & STATUS_UTF16 != 0 {
            decode_utf16(text_bytes)
        } else {
            String::from_utf8_lossy(text_bytes).into_owned()
        };

        return Ok(TagRecord {
            kind: RecordKind::Text,
            language_code: Some(String::from_utf8_lossy(&payload[1..text_start]).into_owned()),
            text,
            raw_bytes: payload.clone(),
        });
    }

    if record.tnf == TNF_WELL_KNOWN && record.record_type == RTD_URI {
        // URI records are always UTF-8, there is no encoding flag to honour
        let code = *payload.first().ok_or(RecordDecodeError::EmptyPayload)?;
        let suffix = String::from_utf8_lossy(&payload[1..]);
        return Ok(TagRecord {
            kind: RecordKind::Uri,
            language_code: None,
            text: format!("{}{}", uri_prefix(code), suffix),
            raw_bytes: payload.clone(),
        });
    }

    let text = match std::str::from_utf8(payload) {
        Ok(s) => s.to_string(),
        Err(_) => hex::encode(payload),
    };
    Ok(TagRecord {
        kind: RecordKind::Opaque,
        language_code: None,
        text,
        raw_bytes: payload.clone(),
    })
}

// Big endian unless a byte order mark says otherwise. A dangling odd byte
// becomes a replacement character.
fn decode_utf16(bytes: &[u8]) -> String {
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };

    let chunks = body.chunks_exact(2);
    let dangling = !chunks.remainder().is_empty();
    let units: Vec<u16> = chunks
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    let mut text = String::from_utf16_lossy(&units);
    if dangling {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Decoded text of a record, or a placeholder carrying the payload hex when
/// the record is malformed.
pub fn describe_record(record: &NdefRecord) -> String {
    match decode_record(record) {
        Ok(decoded) => decoded.text,
        Err(e) => {
            debug!("Record decode failed: {}", e);
            format!("Unreadable record ({}): {}", e, hex::encode(&record.payload))
        }
    }
}

// Status byte: UTF-8 (bit 7=0) | Lang length (bits 0-5)
pub fn create_text_record_payload(language_code: &str, text: &str) -> Result<Vec<u8>, NfcError> {
    let lang = language_code.as_bytes();
    if lang.len() > MAX_LANGUAGE_CODE_LEN || !language_code.is_ascii() {
        return Err(NfcError::InvalidLanguageCode { length: lang.len() });
    }

    let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
    payload.push(lang.len() as u8);
    payload.extend_from_slice(lang);
    payload.extend_from_slice(text.as_bytes());
    Ok(payload)
}

/// A message holding a single well-known "T" record.
pub fn encode_text_message(language_code: &str, text: &str) -> Result<NdefMessage, NfcError> {
    let payload = create_text_record_payload(language_code, text)?;
    Ok(NdefMessage {
        records: vec![NdefRecord {
            tnf: TNF_WELL_KNOWN,
            record_type: RTD_TEXT.to_vec(),
            payload,
            id: None,
        }],
    })
}

// Type and ID lengths are one byte, the payload length at most four
fn field_len<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T, TagIoError> {
    T::try_from(len)
        .map_err(|_| TagIoError::Format(format!("{} of {} bytes is too long", what, len)))
}

fn encode_record(
    record: &NdefRecord,
    mb: bool,
    me: bool,
    out: &mut Vec<u8>,
) -> Result<(), TagIoError> {
    // Bit 7: MB, Bit 6: ME, Bit 5: CF(0), Bit 4: SR, Bit 3: IL, Bits 2-0: TNF
    let short_record = record.payload.len() < 256;
    let mut header = record.tnf & TNF_MASK;
    if mb {
        header |= FLAG_MB;
    }
    if me {
        header |= FLAG_ME;
    }
    if short_record {
        header |= FLAG_SR;
    }
    if record.id.is_some() {
        header |= FLAG_IL;
    }

    out.push(header);
    out.push(field_len::<u8>(record.record_type.len(), "record type")?);
    if short_record {
        out.push(field_len::<u8>(record.payload.len(), "payload")?);
    } else {
        let len = field_len::<u32>(record.payload.len(), "payload")?;
        out.extend_from_slice(&len.to_be_bytes());
    }
    if let Some(id) = &record.id {
        out.push(field_len::<u8>(id.len(), "record id")?);
    }
    out.extend_from_slice(&record.record_type);
    if let Some(id) = &record.id {
        out.extend_from_slice(id);
    }
    out.extend_from_slice(&record.payload);
    Ok(())
}

impl NdefMessage {
    /// Serializes the message. Fails when a type, id or payload is longer
    /// than its length field can express.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TagIoError> {
        let mut out = Vec::new();
        let last = self.records.len().saturating_sub(1);
        for (i, record) in self.records.iter().enumerate() {
            encode_record(record, i == 0, i == last, &mut out)?;
        }
        Ok(out)
    }

    /// Size the message occupies on the tag, before TLV framing.
    pub fn byte_len(&self) -> usize {
        self.records
            .iter()
            .map(|r| {
                let payload_len_field = if r.payload.len() < 256 { 1 } else { 4 };
                let id_len = r.id.as_ref().map_or(0, |id| 1 + id.len());
                2 + payload_len_field + r.record_type.len() + id_len + r.payload.len()
            })
            .sum()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], TagIoError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                TagIoError::Format(format!("truncated {} at offset {}", what, self.pos))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self, what: &str) -> Result<u8, TagIoError> {
        Ok(self.take(1, what)?[0])
    }
}

/// Parses a raw NDEF message. Zero bytes means the tag holds no message.
pub fn parse_ndef_message(data: &[u8]) -> Result<Option<NdefMessage>, TagIoError> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor { data, pos: 0 };
    let mut records = Vec::new();

    loop {
        let header = cursor.byte("record header")?;
        let tnf = header & TNF_MASK;
        if header & FLAG_CF != 0 {
            return Err(TagIoError::Format("chunked records are not supported".into()));
        }

        let type_len = cursor.byte("type length")? as usize;

        // 1 byte for Short Record, 4 bytes otherwise
        let payload_len = if header & FLAG_SR != 0 {
            cursor.byte("payload length")? as usize
        } else {
            let b = cursor.take(4, "payload length")?;
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
        };

        let id_len = if header & FLAG_IL != 0 {
            Some(cursor.byte("id length")? as usize)
        } else {
            None
        };

        let record_type = cursor.take(type_len, "record type")?.to_vec();
        let id = match id_len {
            Some(len) => Some(cursor.take(len, "record id")?.to_vec()),
            None => None,
        };
        let payload = cursor.take(payload_len, "payload")?.to_vec();

        records.push(NdefRecord {
            tnf,
            record_type,
            payload,
            id,
        });

        if header & FLAG_ME != 0 {
            break;
        }
        if cursor.pos >= data.len() {
            return Err(TagIoError::Format("message ends without ME flag".into()));
        }
    }

    debug!("Parsed {} NDEF record(s)", records.len());
    Ok(Some(NdefMessage { records }))
}

/// Frames an NDEF message as a Type 2 tag TLV, terminator included. The
/// three-byte length form tops out at 0xFFFE.
pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Result<Vec<u8>, TagIoError> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    if ndef_bytes.len() < 0xFF {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        let len = u16::try_from(ndef_bytes.len())
            .ok()
            .filter(|&len| len < 0xFFFF)
            .ok_or_else(|| {
                TagIoError::Format(format!("{} byte message does not fit a TLV", ndef_bytes.len()))
            })?;
        tlv.push(0xFF);
        tlv.extend_from_slice(&len.to_be_bytes());
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    Ok(tlv)
}

/// Bytes of TLV framing around a message of `ndef_len` bytes.
pub fn tlv_overhead(ndef_len: usize) -> usize {
    if ndef_len < 0xFF { 3 } else { 5 }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvScan {
    /// The NDEF TLV value occupies this range of the buffer.
    Ndef(std::ops::Range<usize>),
    /// Terminator reached, or an NDEF TLV of length zero.
    Absent,
    /// The buffer stops inside a TLV; read more memory.
    Incomplete,
}

/// Walks the TLV blocks of tag memory looking for the NDEF message.
pub fn scan_tlv(buffer: &[u8]) -> TlvScan {
    let mut i = 0;
    loop {
        let Some(&tag) = buffer.get(i) else {
            return TlvScan::Incomplete;
        };
        match tag {
            TLV_NULL => {
                i += 1;
                continue;
            }
            TLV_TERMINATOR => return TlvScan::Absent,
            _ => {}
        }

        let Some(&first) = buffer.get(i + 1) else {
            return TlvScan::Incomplete;
        };
        let (len, value_start) = if first == 0xFF {
            match (buffer.get(i + 2), buffer.get(i + 3)) {
                (Some(&hi), Some(&lo)) => (u16::from_be_bytes([hi, lo]) as usize, i + 4),
                _ => return TlvScan::Incomplete,
            }
        } else {
            (first as usize, i + 2)
        };

        if tag == TLV_NDEF {
            if len == 0 {
                return TlvScan::Absent;
            }
            if value_start + len > buffer.len() {
                return TlvScan::Incomplete;
            }
            return TlvScan::Ndef(value_start..value_start + len);
        }

        // Lock control, memory control, proprietary: skip the value
        i = value_start + len;
    }
}

/// Extracts the NDEF message bytes from a complete dump of tag memory.
pub fn unwrap_tlv(buffer: &[u8]) -> Result<Option<&[u8]>, TagIoError> {
    match scan_tlv(buffer) {
        TlvScan::Ndef(range) => Ok(Some(&buffer[range])),
        TlvScan::Absent => Ok(None),
        TlvScan::Incomplete if buffer.iter().all(|&b| b == TLV_NULL) => Ok(None),
        TlvScan::Incomplete => Err(TagIoError::Format(
            "NDEF TLV runs past the end of tag memory".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tnf: u8, record_type: &[u8], payload: &[u8]) -> NdefRecord {
        NdefRecord {
            tnf,
            record_type: record_type.to_vec(),
            payload: payload.to_vec(),
            id: None,
        }
    }

    #[test]
    fn text_record_round_trip() {
        let message = encode_text_message("fr", "hello").unwrap();
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 0xD1);

        let parsed = parse_ndef_message(&bytes).unwrap().unwrap();
        assert_eq!(parsed, message);

        let decoded = decode_record(&parsed.records[0]).unwrap();
        assert_eq!(decoded.kind, RecordKind::Text);
        assert_eq!(decoded.language_code.as_deref(), Some("fr"));
        assert_eq!(decoded.text, "hello");
        assert_eq!(decoded.raw_bytes, b"\x02frhello");
    }

    #[test]
    fn language_code_longer_than_63_bytes_is_rejected() {
        for len in [64, 65, 200] {
            let lang = "a".repeat(len);
            assert_eq!(
                encode_text_message(&lang, "x"),
                Err(NfcError::InvalidLanguageCode { length: len })
            );
        }
        let lang = "a".repeat(63);
        let message = encode_text_message(&lang, "x").unwrap();
        assert_eq!(message.records[0].payload[0], 63);
    }

    #[test]
    fn utf16_text_record() {
        // "hi" big endian, then with a little endian BOM
        let be = record(TNF_WELL_KNOWN, b"T", &[0x82, b'e', b'n', 0x00, b'h', 0x00, b'i']);
        assert_eq!(decode_record(&be).unwrap().text, "hi");

        let le = record(
            TNF_WELL_KNOWN,
            b"T",
            &[0x82, b'e', b'n', 0xFF, 0xFE, b'h', 0x00, b'i', 0x00],
        );
        assert_eq!(decode_record(&le).unwrap().text, "hi");
    }

    #[test]
    fn malformed_utf16_decodes_lossily() {
        // Dangling odd byte after "h"
        let odd = record(TNF_WELL_KNOWN, b"T", &[0x82, b'e', b'n', 0x00, b'h', 0x00]);
        assert_eq!(decode_record(&odd).unwrap().text, "h\u{FFFD}");

        let lone_surrogate = record(TNF_WELL_KNOWN, b"T", &[0x82, b'e', b'n', 0xD8, 0x00]);
        let decoded = decode_record(&lone_surrogate).unwrap();
        assert_eq!(decoded.text, "\u{FFFD}");
        assert_eq!(decoded.language_code.as_deref(), Some("en"));
    }

    #[test]
    fn invalid_utf8_decodes_lossily() {
        let text = record(TNF_WELL_KNOWN, b"T", &[0x02, b'e', b'n', 0xC3, 0x28]);
        assert_eq!(decode_record(&text).unwrap().text, "\u{FFFD}(");
        assert_eq!(describe_record(&text), "\u{FFFD}(");

        let uri = record(TNF_WELL_KNOWN, b"U", &[0x03, b'a', 0xFF, b'b']);
        assert_eq!(decode_record(&uri).unwrap().text, "http://a\u{FFFD}b");
    }

    #[test]
    fn empty_text_payload_is_a_decode_error() {
        let empty = record(TNF_WELL_KNOWN, b"T", &[]);
        assert_eq!(decode_record(&empty), Err(RecordDecodeError::EmptyPayload));
        assert!(describe_record(&empty).starts_with("Unreadable record"));
    }

    #[test]
    fn text_record_with_oversized_language_length_fails() {
        let bad = record(TNF_WELL_KNOWN, b"T", &[0x05, b'e', b'n']);
        assert_eq!(
            decode_record(&bad),
            Err(RecordDecodeError::LanguageCodeOutOfRange {
                declared: 5,
                available: 2
            })
        );
        assert!(describe_record(&bad).ends_with("05656e"));
    }

    #[test]
    fn uri_prefix_is_expanded() {
        let mut payload = vec![0x04];
        payload.extend_from_slice(b"example.com");
        let decoded = decode_record(&record(TNF_WELL_KNOWN, b"U", &payload)).unwrap();
        assert_eq!(decoded.kind, RecordKind::Uri);
        assert_eq!(decoded.text, "https://example.com");
    }

    #[test]
    fn unmapped_uri_prefix_is_empty() {
        let mut payload = vec![0x7F];
        payload.extend_from_slice(b"example.com");
        let decoded = decode_record(&record(TNF_WELL_KNOWN, b"U", &payload)).unwrap();
        assert_eq!(decoded.text, "example.com");
        assert_eq!(uri_prefix(0x1D), "file://");
    }

    #[test]
    fn opaque_payload_falls_back_to_hex() {
        let bytes = [0xC3, 0x28, 0xFF, 0x00, 0xAB];
        let decoded = decode_record(&record(0x02, b"application/octet-stream", &bytes)).unwrap();
        assert_eq!(decoded.kind, RecordKind::Opaque);
        assert_eq!(decoded.text, "c328ff00ab");
        assert_eq!(decoded.text.len(), 2 * bytes.len());

        let plain = decode_record(&record(0x02, b"text/plain", b"badge 7")).unwrap();
        assert_eq!(plain.text, "badge 7");
    }

    #[test]
    fn long_records_use_four_byte_length() {
        let text = "x".repeat(300);
        let message = encode_text_message("en", &text).unwrap();
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes[0] & FLAG_SR, 0);
        assert_eq!(&bytes[2..6], &(303u32).to_be_bytes());
        assert_eq!(parse_ndef_message(&bytes).unwrap().unwrap(), message);
    }

    #[test]
    fn multi_record_flags_and_ids() {
        let mut first = record(TNF_WELL_KNOWN, b"U", b"\x03a.b");
        first.id = Some(b"id1".to_vec());
        let message = NdefMessage {
            records: vec![first, record(TNF_WELL_KNOWN, b"T", b"\x02enhey")],
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(bytes[0], FLAG_MB | FLAG_SR | FLAG_IL | TNF_WELL_KNOWN);
        assert_eq!(parse_ndef_message(&bytes).unwrap().unwrap(), message);
    }

    #[test]
    fn overlong_type_and_id_are_refused() {
        let long_type = NdefMessage {
            records: vec![record(0x02, &[b'a'; 256], b"x")],
        };
        assert!(matches!(long_type.to_bytes(), Err(TagIoError::Format(_))));

        let mut with_id = record(TNF_WELL_KNOWN, b"T", b"\x02enhi");
        with_id.id = Some(vec![0x01; 300]);
        let long_id = NdefMessage {
            records: vec![with_id],
        };
        assert!(matches!(long_id.to_bytes(), Err(TagIoError::Format(_))));

        // 255 bytes still fits the one-byte field
        let max_type = NdefMessage {
            records: vec![record(0x02, &[b'a'; 255], b"x")],
        };
        let bytes = max_type.to_bytes().unwrap();
        assert_eq!(bytes[1], 255);
        assert_eq!(bytes.len(), max_type.byte_len());
    }

    #[test]
    fn byte_len_matches_serialized_size() {
        let mut first = record(TNF_WELL_KNOWN, b"U", b"\x03a.b");
        first.id = Some(b"id1".to_vec());
        let message = NdefMessage {
            records: vec![first, record(0x02, b"application/octet-stream", &[0x55; 400])],
        };
        assert_eq!(message.byte_len(), message.to_bytes().unwrap().len());
    }

    #[test]
    fn truncated_message_is_a_format_error() {
        let bytes = encode_text_message("en", "hello").unwrap().to_bytes().unwrap();
        let err = parse_ndef_message(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, TagIoError::Format(_)));

        // ME flag cleared on the only record
        let mut no_end = bytes.clone();
        no_end[0] &= !FLAG_ME;
        assert!(matches!(
            parse_ndef_message(&no_end),
            Err(TagIoError::Format(_))
        ));

        assert_eq!(parse_ndef_message(&[]), Ok(None));
    }

    #[test]
    fn tlv_wrap_and_scan() {
        let ndef = encode_text_message("en", "hello").unwrap().to_bytes().unwrap();
        let tlv = wrap_in_tlv(&ndef).unwrap();
        assert_eq!(tlv[0], 0x03);
        assert_eq!(tlv[1] as usize, ndef.len());
        assert_eq!(*tlv.last().unwrap(), 0xFE);
        assert_eq!(tlv.len(), ndef.len() + tlv_overhead(ndef.len()));

        // Lock control TLV and NULL padding ahead of the message
        let mut memory = vec![0x01, 0x03, 0xA0, 0x10, 0x44, 0x00, 0x00];
        memory.extend_from_slice(&tlv);
        memory.extend_from_slice(&[0x00; 8]);
        assert_eq!(unwrap_tlv(&memory).unwrap(), Some(&ndef[..]));
        assert_eq!(scan_tlv(&memory[..10]), TlvScan::Incomplete);
    }

    #[test]
    fn long_tlv_uses_three_byte_length() {
        let ndef = vec![0xAA; 300];
        let tlv = wrap_in_tlv(&ndef).unwrap();
        assert_eq!(&tlv[..4], &[0x03, 0xFF, 0x01, 0x2C]);
        assert_eq!(scan_tlv(&tlv), TlvScan::Ndef(4..304));
    }

    #[test]
    fn tlv_length_is_bounded() {
        let largest = vec![0xAA; 0xFFFE];
        let tlv = wrap_in_tlv(&largest).unwrap();
        assert_eq!(&tlv[..4], &[0x03, 0xFF, 0xFF, 0xFE]);

        for len in [0xFFFF, 0x1_0000] {
            assert!(matches!(
                wrap_in_tlv(&vec![0xAA; len]),
                Err(TagIoError::Format(_))
            ));
        }
    }

    #[test]
    fn empty_tlv_means_no_message() {
        assert_eq!(unwrap_tlv(&[0x03, 0x00, 0xFE]).unwrap(), None);
        assert_eq!(unwrap_tlv(&[0xFE, 0x00]).unwrap(), None);
        assert_eq!(unwrap_tlv(&[0x00; 16]).unwrap(), None);
        assert!(unwrap_tlv(&[0x03, 0x20, 0xD1]).is_err());
    }
}
