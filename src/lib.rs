pub mod apdu;
pub mod cards;
pub mod config;
pub mod driver;
pub mod error;
pub mod ndef;
pub mod nfc_service;
pub mod pcsc_tag;
pub mod report;
pub mod tag;
pub mod types;
pub mod ws;
