// src/apdu.rs
use pcsc::Card;

use crate::error::TagIoError;

// Send a pseudo-APDU to the reader and strip the 90 00 status word
fn transmit(card: &Card, apdu: &[u8], what: &str) -> Result<Vec<u8>, TagIoError> {
    let mut recv_buffer = [0u8; 258];
    let resp = card.transmit(apdu, &mut recv_buffer)?;

    if resp.len() >= 2 && resp[resp.len() - 2] == 0x90 && resp[resp.len() - 1] == 0x00 {
        Ok(resp[0..resp.len() - 2].to_vec())
    } else {
        Err(TagIoError::Io(format!("{} failed: {:02X?}", what, resp)))
    }
}

// Get Data: FF CA 00 00 00 -> card UID
pub fn get_uid(card: &Card) -> Result<Vec<u8>, TagIoError> {
    transmit(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00], "Get UID")
}

// Load Authentication Keys into Reader Memory (Location 0x00 or 0x20)
// ACR122U standard: FF 82 00 key_num 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), TagIoError> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    transmit(card, &apdu, "Load Key").map(|_| ())
}

// Authenticate Block
// CMD: FF 86 00 00 05 01 00 Block KeyType KeyNumber
// KeyType: 0x60 (A), 0x61 (B)
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), TagIoError> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    transmit(card, &apdu, "Auth").map(|_| ())
}

// Read: FF B0 00 Block Len
pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, TagIoError> {
    transmit(card, &[0xFF, 0xB0, 0x00, block, length], "Read")
}

// Write: FF D6 00 Block Len [Data]
pub fn update_binary(card: &Card, block: u8, data: &[u8]) -> Result<(), TagIoError> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, block, data.len() as u8];
    apdu.extend_from_slice(data);
    transmit(card, &apdu, "Write").map(|_| ())
}
