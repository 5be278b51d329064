// src/pcsc_tag.rs
//
// The only place that opens a card. Everything downstream sees a TagHandle.
use std::ffi::CStr;

use log::{debug, warn};
use pcsc::{Card, Context, Disposition, Protocols, ShareMode};

use crate::apdu;
use crate::cards::{self, CapabilityContainer};
use crate::error::TagIoError;
use crate::ndef;
use crate::tag::{NdefSupport, TagHandle};
use crate::types::{CARD_TYPE_MIFARE_1K, NdefMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    MifareClassic1k,
    Ntag,
}

/// Card family from the last ATR byte. Anything unknown is treated as a
/// Type 2 tag.
pub fn kind_from_atr(atr: &[u8]) -> CardKind {
    match atr.last() {
        Some(last) if format!("{:x}", last) == CARD_TYPE_MIFARE_1K => CardKind::MifareClassic1k,
        _ => CardKind::Ntag,
    }
}

/// How the first MIFARE data block looks decides what we can do with it:
/// a TLV area is NDEF, a zeroed block can take one, anything else belongs to
/// some other application.
pub fn classify_mifare_block(block: &[u8]) -> NdefSupport {
    if block.iter().all(|&b| b == 0x00) {
        return NdefSupport::Formatable;
    }
    match ndef::scan_tlv(block) {
        ndef::TlvScan::Ndef(_) | ndef::TlvScan::Absent => NdefSupport::Ndef,
        ndef::TlvScan::Incomplete if block.iter().find(|&&b| b != 0x00) == Some(&0x03) => {
            NdefSupport::Ndef
        }
        ndef::TlvScan::Incomplete => NdefSupport::Unsupported,
    }
}

pub fn classify_cc(cc: &CapabilityContainer) -> NdefSupport {
    if cc.is_ndef() {
        NdefSupport::Ndef
    } else if cc.is_blank() {
        NdefSupport::Formatable
    } else {
        NdefSupport::Unsupported
    }
}

pub struct PcscTag {
    card: Option<Card>,
    kind: CardKind,
    uid: Vec<u8>,
    support: NdefSupport,
    cc: Option<CapabilityContainer>,
}

impl PcscTag {
    /// Connects to the card on `reader` and checks what it supports.
    pub fn open(ctx: &Context, reader: &CStr) -> Result<Self, TagIoError> {
        let card = ctx.connect(reader, ShareMode::Shared, Protocols::ANY)?;

        let mut names_buf = [0u8; 128];
        let mut atr_buf = [0u8; 64];
        let kind = match card.status2(&mut names_buf, &mut atr_buf) {
            Ok(status) => kind_from_atr(status.atr()),
            Err(e) => return Err(e.into()),
        };

        let uid = match apdu::get_uid(&card) {
            Ok(uid) => uid,
            Err(TagIoError::TagLost) => return Err(TagIoError::TagLost),
            Err(e) => {
                warn!("Could not read tag UID: {}", e);
                Vec::new()
            }
        };

        let mut tag = PcscTag {
            card: Some(card),
            kind,
            uid,
            support: NdefSupport::Unsupported,
            cc: None,
        };
        tag.detect_support()?;
        debug!(
            "Opened {:?} tag {} ({:?})",
            tag.kind,
            hex::encode(&tag.uid),
            tag.support
        );
        Ok(tag)
    }

    fn detect_support(&mut self) -> Result<(), TagIoError> {
        let card = self.card()?;
        let detected = match self.kind {
            CardKind::Ntag => cards::read_ntag_cc(card).map(|cc| (classify_cc(&cc), Some(cc))),
            CardKind::MifareClassic1k => {
                cards::read_mifare_first_block(card).map(|block| (classify_mifare_block(&block), None))
            }
        };

        match detected {
            Ok((support, cc)) => {
                self.support = support;
                self.cc = cc;
                Ok(())
            }
            Err(TagIoError::TagLost) => Err(TagIoError::TagLost),
            Err(e) => {
                debug!("Support check failed, tag has no NDEF support: {}", e);
                self.support = NdefSupport::Unsupported;
                Ok(())
            }
        }
    }

    fn card(&self) -> Result<&Card, TagIoError> {
        self.card
            .as_ref()
            .ok_or_else(|| TagIoError::Io("tag handle is closed".into()))
    }

    fn data_area(&self) -> usize {
        match self.kind {
            CardKind::MifareClassic1k => cards::mifare_data_area(),
            CardKind::Ntag => cards::ntag_data_area(self.cc),
        }
    }

    fn write_tlv(&self, message: &NdefMessage) -> Result<(), TagIoError> {
        let card = self.card()?;
        let tlv = ndef::wrap_in_tlv(&message.to_bytes()?)?;
        match self.kind {
            CardKind::Ntag => cards::write_ntag(card, &tlv),
            CardKind::MifareClassic1k => cards::write_mifare(card, &tlv),
        }
    }
}

impl TagHandle for PcscTag {
    fn id(&self) -> &[u8] {
        &self.uid
    }

    fn support(&self) -> NdefSupport {
        self.support
    }

    fn connect(&mut self) -> Result<(), TagIoError> {
        // The card was connected at discovery; check it is still there
        let card = self.card()?;
        let mut names_buf = [0u8; 128];
        let mut atr_buf = [0u8; 64];
        card.status2(&mut names_buf, &mut atr_buf)?;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        match (self.kind, self.cc) {
            (CardKind::Ntag, Some(cc)) if cc.is_ndef() => cc.is_writable(),
            _ => self.support != NdefSupport::Unsupported,
        }
    }

    fn max_size(&self) -> usize {
        cards::max_ndef_size(self.data_area())
    }

    fn read_ndef_message(&mut self) -> Result<Option<NdefMessage>, TagIoError> {
        let card = self.card()?;
        let raw = match self.kind {
            CardKind::Ntag => cards::read_ntag(card, self.data_area())?,
            CardKind::MifareClassic1k => cards::read_mifare(card)?,
        };

        match ndef::unwrap_tlv(&raw)? {
            Some(bytes) => ndef::parse_ndef_message(bytes),
            None => Ok(None),
        }
    }

    fn write_ndef_message(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        self.write_tlv(message)
    }

    fn format(&mut self, message: &NdefMessage) -> Result<(), TagIoError> {
        if self.kind == CardKind::Ntag {
            let cc = CapabilityContainer::for_data_area(cards::NTAG213_DATA_AREA);
            cards::write_ntag_cc(self.card()?, cc)?;
            self.cc = Some(cc);
        }
        // On MIFARE Classic the TLV area itself is the container
        self.write_tlv(message)?;
        self.support = NdefSupport::Ndef;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TagIoError> {
        match self.card.take() {
            Some(card) => card
                .disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| TagIoError::from(e)),
            None => Ok(()),
        }
    }
}
