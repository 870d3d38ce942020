// src/types.rs
use serde::{Deserialize, Serialize};

use crate::ndef::RTD_TEXT;

// Messages sent TO the WebSocket client (Frontend)
#[allow(non_camel_case_types)]
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    READER_STATUS { success: bool },
    CARD_STATUS { success: bool, message: String },
    DATA_READ_SUCCESS {
        data: String,
        language: String,
        encoding: String,
    },
    DATA_READ_EMPTY,
    DATA_READ_ERROR { error: String },
    DATA_WRITE_SUCCESS { message: String },
    DATA_WRITE_ERROR { error: String },
    READER_ERROR { error: String },
}

// Messages received FROM the WebSocket client
#[allow(non_camel_case_types)]
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    GET_READER_STATUS,
    WRITE_TEXT {
        text: String,
        #[serde(default)]
        language: Option<String>,
    },
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug, PartialEq)]
pub enum NfcCommand {
    WriteText {
        text: String,
        language: Option<String>,
    },
    CheckReaderStatus,
}

/// Type Name Format, the low three bits of a record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tnf {
    Empty = 0x00,
    WellKnown = 0x01,
    Media = 0x02,
    AbsoluteUri = 0x03,
    External = 0x04,
    Unknown = 0x05,
    Unchanged = 0x06,
    Reserved = 0x07,
}

impl Tnf {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0x00 => Tnf::Empty,
            0x01 => Tnf::WellKnown,
            0x02 => Tnf::Media,
            0x03 => Tnf::AbsoluteUri,
            0x04 => Tnf::External,
            0x05 => Tnf::Unknown,
            0x06 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: Tnf,
    pub record_type: Vec<u8>,
    pub id: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn is_text(&self) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type == RTD_TEXT
    }
}

pub const NO_TAG_DETECTED: &str = "No NFC Tag detected";
pub const WRITE_SUCCESS: &str = "Tag written successfully!";

pub fn write_error_message(error: &impl std::fmt::Display) -> String {
    format!("Error during writing, Try Again! Error is : {}", error)
}
