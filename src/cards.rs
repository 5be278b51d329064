// src/cards.rs
use log::{debug, warn};
use pcsc::Card;

use crate::apdu;
use crate::error::TagIoError;
use crate::ndef::{self, TlvScan};

// Keys from the JS file
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

const KEY_A: u8 = 0x60;
const KEY_B: u8 = 0x61;

const MIFARE_BLOCK_SIZE: usize = 16;
const NTAG_PAGE_SIZE: usize = 4;
const NTAG_CC_PAGE: u8 = 3;
const NTAG_FIRST_DATA_PAGE: u8 = 4;
const CC_MAGIC: u8 = 0xE1;

/// NTAG213 data area, used when formatting a tag with a blank CC.
pub const NTAG213_DATA_AREA: usize = 144;

/// Bytes reachable from page 4 with a one-byte page address.
pub const NTAG_MAX_DATA_AREA: usize = (256 - NTAG_FIRST_DATA_PAGE as usize) * NTAG_PAGE_SIZE;

/// Type 2 tag capability container (page 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub magic: u8,
    pub version: u8,
    pub data_area: usize,
    pub access: u8,
}

impl CapabilityContainer {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [magic, version, size, access, ..] => Some(CapabilityContainer {
                magic: *magic,
                version: *version,
                data_area: *size as usize * 8,
                access: *access,
            }),
            _ => None,
        }
    }

    pub fn for_data_area(data_area: usize) -> Self {
        CapabilityContainer {
            magic: CC_MAGIC,
            version: 0x10,
            data_area,
            access: 0x00,
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.magic, self.version, (self.data_area / 8) as u8, self.access]
    }

    pub fn is_ndef(&self) -> bool {
        self.magic == CC_MAGIC
    }

    /// A CC that was never programmed reads back as zeros.
    pub fn is_blank(&self) -> bool {
        self.magic == 0 && self.version == 0 && self.data_area == 0 && self.access == 0
    }

    // Low nibble: 0x0 = write granted, 0xF = no write access
    pub fn is_writable(&self) -> bool {
        self.access & 0x0F == 0x00
    }
}

/// Data area of a Type 2 tag, limited to what READ/UPDATE BINARY can address.
/// Without an NDEF CC the tag gets formatted as an NTAG213.
pub fn ntag_data_area(cc: Option<CapabilityContainer>) -> usize {
    match cc {
        Some(cc) if cc.is_ndef() => cc.data_area.min(NTAG_MAX_DATA_AREA),
        _ => NTAG213_DATA_AREA,
    }
}

// Page address of the `index`-th data page
fn ntag_page(index: usize) -> Result<u8, TagIoError> {
    u8::try_from(index)
        .ok()
        .and_then(|i| NTAG_FIRST_DATA_PAGE.checked_add(i))
        .ok_or_else(|| TagIoError::Io(format!("data page {} is not addressable", index)))
}

/// Largest NDEF message that fits in `data_area` once TLV framing is added.
pub fn max_ndef_size(data_area: usize) -> usize {
    let short = data_area.saturating_sub(ndef::tlv_overhead(0));
    if short < 0xFF {
        short
    } else {
        data_area.saturating_sub(ndef::tlv_overhead(0xFF)).max(0xFE)
    }
}

pub fn get_mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 is usually read-only manufacturer data, so we start at Sector 1
    for sector in 1..16 {
        for block_in_sector in 0..3 {
            // 0, 1, 2 are data. 3 is the Trailer.
            blocks.push((sector * 4) + block_in_sector);
        }
    }
    blocks
}

pub fn mifare_data_area() -> usize {
    get_mifare_data_blocks().len() * MIFARE_BLOCK_SIZE
}

// Try every known key. Only a lost tag aborts; a rejected key moves on.
fn authenticate_sector(card: &Card, block: u8, key_types: &[u8]) -> Result<bool, TagIoError> {
    for key in COMMON_KEYS.iter() {
        match apdu::load_key(card, key) {
            Ok(()) => {}
            Err(TagIoError::TagLost) => return Err(TagIoError::TagLost),
            Err(_) => continue,
        }
        for &key_type in key_types {
            match apdu::authenticate(card, block, key_type) {
                Ok(()) => return Ok(true),
                Err(TagIoError::TagLost) => return Err(TagIoError::TagLost),
                Err(_) => {}
            }
        }
    }
    Ok(false)
}

/// First data block of a MIFARE Classic card, sector 1.
pub fn read_mifare_first_block(card: &Card) -> Result<Vec<u8>, TagIoError> {
    let block = get_mifare_data_blocks()[0];
    if !authenticate_sector(card, block, &[KEY_A, KEY_B])? {
        return Err(TagIoError::Io(format!(
            "could not authenticate sector at block {}",
            block
        )));
    }
    apdu::read_binary(card, block, MIFARE_BLOCK_SIZE as u8)
}

/// Reads data blocks until the NDEF TLV is complete or memory runs out.
pub fn read_mifare(card: &Card) -> Result<Vec<u8>, TagIoError> {
    let mut full_data = Vec::new();

    for block in get_mifare_data_blocks() {
        // We must authenticate at the start of every sector (blocks 4, 8, 12, etc.)
        if block % 4 == 0 && !authenticate_sector(card, block, &[KEY_A, KEY_B])? {
            // If we can't get into this sector, we can't read the rest of the records
            warn!("Could not authenticate sector at block {}. Stopping.", block);
            break;
        }

        let data = apdu::read_binary(card, block, MIFARE_BLOCK_SIZE as u8)?;
        full_data.extend_from_slice(&data);

        if ndef::scan_tlv(&full_data) != TlvScan::Incomplete {
            break;
        }
    }

    if full_data.is_empty() {
        return Err(TagIoError::Io("No data could be read from the card.".into()));
    }

    debug!("Read {} bytes from MIFARE Classic", full_data.len());
    Ok(full_data)
}

pub fn write_mifare(card: &Card, data: &[u8]) -> Result<(), TagIoError> {
    let blocks = get_mifare_data_blocks();
    let chunks = data.chunks(MIFARE_BLOCK_SIZE);
    if chunks.len() > blocks.len() {
        return Err(TagIoError::Io(format!(
            "{} bytes do not fit in {} data blocks",
            data.len(),
            blocks.len()
        )));
    }

    for (&block, chunk) in blocks.iter().zip(chunks) {
        // Authenticate Sector
        if block % 4 == 0 && !authenticate_sector(card, block, &[KEY_A])? {
            return Err(TagIoError::Io("Write Auth Failed".to_string()));
        }

        let mut padded = [0u8; MIFARE_BLOCK_SIZE]; // Pad with 0s
        padded[..chunk.len()].copy_from_slice(chunk);
        apdu::update_binary(card, block, &padded)?;
    }
    Ok(())
}

pub fn read_ntag_cc(card: &Card) -> Result<CapabilityContainer, TagIoError> {
    let bytes = apdu::read_binary(card, NTAG_CC_PAGE, NTAG_PAGE_SIZE as u8)?;
    CapabilityContainer::parse(&bytes)
        .ok_or_else(|| TagIoError::Io(format!("short capability container: {:02X?}", bytes)))
}

pub fn write_ntag_cc(card: &Card, cc: CapabilityContainer) -> Result<(), TagIoError> {
    apdu::update_binary(card, NTAG_CC_PAGE, &cc.to_bytes())
}

/// Reads 16 bytes (four pages) at a time from page 4 until the NDEF TLV is
/// complete or the data area is exhausted.
pub fn read_ntag(card: &Card, data_area: usize) -> Result<Vec<u8>, TagIoError> {
    let data_area = data_area.min(NTAG_MAX_DATA_AREA);
    let mut full_data = Vec::new();
    let mut index = 0;

    while full_data.len() < data_area {
        let data = apdu::read_binary(card, ntag_page(index)?, 16)?;
        if data.is_empty() {
            break;
        }
        full_data.extend_from_slice(&data);
        index += data.len().div_ceil(NTAG_PAGE_SIZE);

        if ndef::scan_tlv(&full_data) != TlvScan::Incomplete {
            break;
        }
    }

    full_data.truncate(data_area);
    debug!("Read {} bytes from NTAG", full_data.len());
    Ok(full_data)
}

pub fn write_ntag(card: &Card, data: &[u8]) -> Result<(), TagIoError> {
    // NTAG writes 4 bytes (1 page) at a time
    // Pad to multiple of 4
    let mut padded_data = data.to_vec();
    while padded_data.len() % NTAG_PAGE_SIZE != 0 {
        padded_data.push(0x00);
    }
    if padded_data.len() > NTAG_MAX_DATA_AREA {
        return Err(TagIoError::Io(format!(
            "{} bytes do not fit in the addressable NTAG area",
            padded_data.len()
        )));
    }

    for (index, chunk) in padded_data.chunks(NTAG_PAGE_SIZE).enumerate() {
        apdu::update_binary(card, ntag_page(index)?, chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ntag215_cc() {
        let cc = CapabilityContainer::parse(&[0xE1, 0x10, 0x3E, 0x00]).unwrap();
        assert!(cc.is_ndef());
        assert!(cc.is_writable());
        assert_eq!(cc.data_area, 496);
        assert_eq!(cc.to_bytes(), [0xE1, 0x10, 0x3E, 0x00]);
    }

    #[test]
    fn locked_and_blank_cc() {
        let locked = CapabilityContainer::parse(&[0xE1, 0x10, 0x12, 0x0F]).unwrap();
        assert!(!locked.is_writable());

        let blank = CapabilityContainer::parse(&[0, 0, 0, 0]).unwrap();
        assert!(blank.is_blank());
        assert!(!blank.is_ndef());

        assert_eq!(CapabilityContainer::parse(&[0xE1, 0x10]), None);
    }

    #[test]
    fn capacity_accounts_for_tlv_framing() {
        assert_eq!(max_ndef_size(NTAG213_DATA_AREA), 141);
        assert_eq!(max_ndef_size(496), 491);
        assert_eq!(max_ndef_size(2), 0);
    }

    #[test]
    fn oversized_cc_is_capped_to_addressable_pages() {
        let cc = CapabilityContainer::parse(&[0xE1, 0x10, 0xFF, 0x00]).unwrap();
        assert_eq!(cc.data_area, 2040);
        assert_eq!(ntag_data_area(Some(cc)), NTAG_MAX_DATA_AREA);
        assert_eq!(NTAG_MAX_DATA_AREA, 1008);
        assert_eq!(max_ndef_size(ntag_data_area(Some(cc))), 1003);

        let ntag215 = CapabilityContainer::parse(&[0xE1, 0x10, 0x3E, 0x00]).unwrap();
        assert_eq!(ntag_data_area(Some(ntag215)), 496);
        assert_eq!(ntag_data_area(None), NTAG213_DATA_AREA);
    }

    #[test]
    fn page_addresses_stop_at_255() {
        assert_eq!(ntag_page(0), Ok(4));
        assert_eq!(ntag_page(251), Ok(255));
        assert!(matches!(ntag_page(252), Err(TagIoError::Io(_))));
        assert!(matches!(ntag_page(usize::MAX), Err(TagIoError::Io(_))));
        // Every page of the capped area has an address
        assert!(ntag_page(NTAG_MAX_DATA_AREA / NTAG_PAGE_SIZE - 1).is_ok());
    }

    #[test]
    fn mifare_layout_skips_trailers() {
        let blocks = get_mifare_data_blocks();
        assert_eq!(blocks.len(), 45);
        assert_eq!(&blocks[..4], &[4, 5, 6, 8]);
        assert!(blocks.iter().all(|b| (b + 1) % 4 != 0));
        assert_eq!(mifare_data_area(), 720);
    }
}
