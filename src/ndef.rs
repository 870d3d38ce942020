// src/ndef.rs
use thiserror::Error;

use crate::text_record::{self, EncodeError};
use crate::types::{NdefRecord, Tnf};

// Record header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

pub const RTD_TEXT: &[u8] = b"T";

// Type 2 tag TLV blocks
const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;
const TLV_LONG_LENGTH: u8 = 0xFF;
// 0xFFFF is reserved in the 3-byte length form
const TLV_MAX_LEN: usize = 0xFFFE;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("NDEF message is empty")]
    Empty,
    #[error("NDEF data truncated while reading {0}")]
    Truncated(&'static str),
    #[error("chunked NDEF records are not supported")]
    ChunkedRecord,
    #[error("NDEF message of {0} bytes does not fit in a TLV")]
    TooLong(usize),
}

/// Single-record NDEF message holding one well-known Text record.
pub fn encode_text_message(text: &str, language: &str) -> Result<Vec<u8>, EncodeError> {
    let payload = text_record::encode(text, language)?;
    Ok(encode_record(Tnf::WellKnown, RTD_TEXT, &payload, true, true))
}

/// Serializes one record. Short form is used whenever the payload fits in a byte.
pub fn encode_record(tnf: Tnf, record_type: &[u8], payload: &[u8], mb: bool, me: bool) -> Vec<u8> {
    let short = payload.len() <= u8::MAX as usize;

    let mut header = tnf as u8;
    if mb {
        header |= FLAG_MB;
    }
    if me {
        header |= FLAG_ME;
    }
    if short {
        header |= FLAG_SR;
    }

    let mut record = Vec::with_capacity(6 + record_type.len() + payload.len());
    record.push(header);
    record.push(record_type.len() as u8);
    if short {
        record.push(payload.len() as u8);
    } else {
        record.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    }
    record.extend_from_slice(record_type);
    record.extend_from_slice(payload);
    record
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::Truncated(what))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, FormatError> {
        Ok(self.take(1, what)?[0])
    }
}

pub fn parse_records(data: &[u8]) -> Result<Vec<NdefRecord>, FormatError> {
    if data.is_empty() {
        return Err(FormatError::Empty);
    }

    let mut records = Vec::new();
    let mut cursor = Cursor { data, pos: 0 };

    while cursor.pos < data.len() {
        let header = cursor.byte("header")?;
        if header & FLAG_CF != 0 {
            return Err(FormatError::ChunkedRecord);
        }

        let type_len = cursor.byte("type length")? as usize;
        let payload_len = if header & FLAG_SR != 0 {
            cursor.byte("payload length")? as usize
        } else {
            let raw = cursor.take(4, "payload length")?;
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            Some(cursor.byte("id length")? as usize)
        } else {
            None
        };

        let record_type = cursor.take(type_len, "type")?.to_vec();
        let id = match id_len {
            Some(len) => Some(cursor.take(len, "id")?.to_vec()),
            None => None,
        };
        let payload = cursor.take(payload_len, "payload")?.to_vec();

        records.push(NdefRecord {
            tnf: Tnf::from_bits(header & TNF_MASK),
            record_type,
            id,
            payload,
        });

        if header & FLAG_ME != 0 {
            break;
        }
    }

    Ok(records)
}

pub fn first_text_record(records: &[NdefRecord]) -> Option<&NdefRecord> {
    records.iter().find(|r| r.is_text())
}

pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Result<Vec<u8>, FormatError> {
    if ndef_bytes.len() > TLV_MAX_LEN {
        return Err(FormatError::TooLong(ndef_bytes.len()));
    }

    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    if ndef_bytes.len() < TLV_LONG_LENGTH as usize {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        tlv.push(TLV_LONG_LENGTH);
        tlv.extend_from_slice(&(ndef_bytes.len() as u16).to_be_bytes());
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    Ok(tlv)
}

/// Finds the NDEF message inside Type 2 tag memory. `None` means the tag
/// holds no message.
pub fn unwrap_tlv(memory: &[u8]) -> Result<Option<Vec<u8>>, FormatError> {
    let mut cursor = Cursor {
        data: memory,
        pos: 0,
    };

    while cursor.pos < memory.len() {
        let tag = cursor.byte("TLV tag")?;
        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => return Ok(None),
            _ => {}
        }

        let len = match cursor.byte("TLV length")? {
            TLV_LONG_LENGTH => {
                let raw = cursor.take(2, "TLV length")?;
                u16::from_be_bytes([raw[0], raw[1]]) as usize
            }
            short => short as usize,
        };

        let value = cursor.take(len, "TLV value")?;
        if tag == TLV_NDEF {
            if value.is_empty() {
                return Ok(None);
            }
            return Ok(Some(value.to_vec()));
        }
    }

    Ok(None)
}

/// Length of the NDEF TLV for a message, used to decide how much tag memory
/// to read. Needs the first four bytes of the data area.
pub fn tlv_total_len(head: &[u8]) -> Option<usize> {
    match head {
        [TLV_NDEF, TLV_LONG_LENGTH, hi, lo, ..] => {
            Some(4 + u16::from_be_bytes([*hi, *lo]) as usize + 1)
        }
        [TLV_NDEF, len, ..] => Some(2 + *len as usize + 1),
        _ => None,
    }
}
