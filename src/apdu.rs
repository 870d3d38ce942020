// src/apdu.rs
//! Reader pseudo-APDUs (PC/SC part 3 storage commands) for Type 2 tags.
use pcsc::Card;

use crate::tag_io::IoError;

pub const PAGE_SIZE: usize = 4;

fn transmit(card: &Card, apdu: &[u8]) -> Result<Vec<u8>, IoError> {
    let mut recv_buffer = [0u8; 258];
    let resp = card.transmit(apdu, &mut recv_buffer).map_err(|e| match e {
        pcsc::Error::RemovedCard | pcsc::Error::ResetCard => IoError::CardRemoved,
        other => IoError::Transmit(other),
    })?;
    split_status(resp)
}

/// Strips the trailing status word, failing unless it is 90 00.
pub fn split_status(resp: &[u8]) -> Result<Vec<u8>, IoError> {
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        [.., sw1, sw2] => Err(IoError::Status(*sw1, *sw2)),
        _ => Err(IoError::Status(0, 0)),
    }
}

// Read: FF B0 00 Page Len
pub fn read_binary(card: &Card, page: u8, length: u8) -> Result<Vec<u8>, IoError> {
    transmit(card, &[0xFF, 0xB0, 0x00, page, length])
}

// Write: FF D6 00 Page 04 [Data]
pub fn update_binary(card: &Card, page: u8, data: &[u8; PAGE_SIZE]) -> Result<(), IoError> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, page, PAGE_SIZE as u8];
    apdu.extend_from_slice(data);
    transmit(card, &apdu).map(|_| ())
}
