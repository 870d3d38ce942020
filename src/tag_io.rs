// src/tag_io.rs
use std::ffi::{CStr, CString};

use log::{debug, warn};
use pcsc::{Card, Context, Disposition, Protocols, ShareMode};
use thiserror::Error;

use crate::apdu::{self, PAGE_SIZE};
use crate::ndef::{self, FormatError};

// Type 2 tag layout: capability container on page 3, data area from page 4.
const CC_PAGE: u8 = 3;
const DATA_START_PAGE: u8 = 4;
const CC_MAGIC: u8 = 0xE1;
const READ_CHUNK: usize = 16;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("reader transmit failed: {0}")]
    Transmit(#[source] pcsc::Error),
    #[error("connect failed: {0}")]
    Connect(#[source] pcsc::Error),
    #[error("card answered with status {0:02X} {1:02X}")]
    Status(u8, u8),
    #[error("card was removed")]
    CardRemoved,
    #[error("tag not connected")]
    NotConnected,
    #[error("message needs {needed} bytes but the tag holds {available}")]
    Capacity { needed: usize, available: usize },
    #[error("tag is not NDEF formatted")]
    NotFormatted,
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Hardware side of a tag read or write.
pub trait TagIo {
    fn connect(&mut self) -> Result<(), IoError>;

    /// The stored NDEF message, or `None` if the tag carries none.
    fn read_message(&mut self) -> Result<Option<Vec<u8>>, IoError>;

    fn write_message(&mut self, message: &[u8]) -> Result<(), IoError>;

    fn close(&mut self) -> Result<(), IoError>;
}

/// Runs `f` on a connected tag and closes it afterwards, whatever `f` returned.
pub fn with_connection<T, R, F>(io: &mut T, f: F) -> Result<R, IoError>
where
    T: TagIo + ?Sized,
    F: FnOnce(&mut T) -> Result<R, IoError>,
{
    io.connect()?;
    let result = f(io);
    if let Err(e) = io.close() {
        warn!("Closing tag failed: {}", e);
    }
    result
}

/// Data area size in bytes: byte 2 of the capability container, times 8.
pub fn capacity_from_cc(cc: &[u8]) -> Result<usize, IoError> {
    match cc {
        [CC_MAGIC, _, size, ..] => Ok(*size as usize * 8),
        _ => Err(IoError::NotFormatted),
    }
}

/// Splits a TLV into data-area pages, zero-padding the last one.
pub fn pages(tlv: &[u8]) -> Result<Vec<(u8, [u8; PAGE_SIZE])>, IoError> {
    tlv.chunks(PAGE_SIZE)
        .enumerate()
        .map(|(i, chunk)| -> Result<(u8, [u8; PAGE_SIZE]), IoError> {
            let page = u8::try_from(DATA_START_PAGE as usize + i).map_err(|_| IoError::Capacity {
                needed: tlv.len(),
                available: (u8::MAX - DATA_START_PAGE + 1) as usize * PAGE_SIZE,
            })?;
            let mut data = [0u8; PAGE_SIZE];
            data[..chunk.len()].copy_from_slice(chunk);
            Ok((page, data))
        })
        .collect()
}

/// Page writes in Type 2 tag order: the first page with a zero NDEF length,
/// then the rest of the message, then the first page with the real length.
/// A tag pulled mid-write is left holding an empty message.
pub fn write_order(tlv: &[u8]) -> Result<Vec<(u8, [u8; PAGE_SIZE])>, IoError> {
    let pages = pages(tlv)?;
    let Some(&(first_page, first)) = pages.first() else {
        return Ok(pages);
    };
    if pages.len() == 1 {
        return Ok(pages);
    }

    let mut emptied = first;
    if emptied[1] == 0xFF {
        emptied[2..].fill(0);
    } else {
        emptied[1] = 0;
    }

    let mut order = Vec::with_capacity(pages.len() + 1);
    order.push((first_page, emptied));
    order.extend_from_slice(&pages[1..]);
    order.push((first_page, first));
    Ok(order)
}

fn check_capacity(tlv: &[u8], capacity: usize) -> Result<(), IoError> {
    if tlv.len() > capacity {
        return Err(IoError::Capacity {
            needed: tlv.len(),
            available: capacity,
        });
    }
    Ok(())
}

/// Type 2 tag (NTAG / Ultralight) behind a PC/SC reader.
pub struct PcscTag<'ctx> {
    ctx: &'ctx Context,
    reader: CString,
    card: Option<Card>,
}

impl<'ctx> PcscTag<'ctx> {
    pub fn new(ctx: &'ctx Context, reader: &CStr) -> Self {
        PcscTag {
            ctx,
            reader: reader.to_owned(),
            card: None,
        }
    }

    fn card(&self) -> Result<&Card, IoError> {
        self.card.as_ref().ok_or(IoError::NotConnected)
    }

    fn capacity(&self) -> Result<usize, IoError> {
        let cc = apdu::read_binary(self.card()?, CC_PAGE, PAGE_SIZE as u8)?;
        capacity_from_cc(&cc)
    }

    fn read_data_area(&self, len: usize) -> Result<Vec<u8>, IoError> {
        let card = self.card()?;
        let mut data = Vec::with_capacity(len);
        let mut next_page = DATA_START_PAGE as usize;

        while data.len() < len {
            let page = u8::try_from(next_page).map_err(|_| IoError::Capacity {
                needed: len,
                available: data.len(),
            })?;
            let chunk = apdu::read_binary(card, page, READ_CHUNK as u8)?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
            next_page += chunk.len().div_ceil(PAGE_SIZE);
        }

        data.truncate(len);
        Ok(data)
    }
}

impl TagIo for PcscTag<'_> {
    fn connect(&mut self) -> Result<(), IoError> {
        let card = self
            .ctx
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| match e {
                pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => IoError::CardRemoved,
                other => IoError::Connect(other),
            })?;
        self.card = Some(card);
        Ok(())
    }

    fn read_message(&mut self) -> Result<Option<Vec<u8>>, IoError> {
        let capacity = self.capacity()?;
        let head = self.read_data_area(READ_CHUNK.min(capacity))?;

        // Jump straight to the message length when the NDEF TLV comes first,
        // otherwise scan the whole data area.
        let memory = match ndef::tlv_total_len(&head) {
            Some(total) if total <= head.len() => head,
            Some(total) => self.read_data_area(total.min(capacity))?,
            None => self.read_data_area(capacity)?,
        };
        debug!("Tag memory: {}", hex::encode(&memory));

        Ok(ndef::unwrap_tlv(&memory)?)
    }

    fn write_message(&mut self, message: &[u8]) -> Result<(), IoError> {
        let tlv = ndef::wrap_in_tlv(message)?;
        check_capacity(&tlv, self.capacity()?)?;

        let card = self.card()?;
        for (page, data) in write_order(&tlv)? {
            apdu::update_binary(card, page, &data)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), IoError> {
        match self.card.take() {
            Some(card) => card
                .disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| IoError::Transmit(e)),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MemoryTag;
    use super::*;

    #[test]
    fn capacity_from_capability_container() {
        assert_eq!(capacity_from_cc(&[0xE1, 0x10, 0x12, 0x00]).unwrap(), 144);
        assert_eq!(capacity_from_cc(&[0xE1, 0x10, 0x3E, 0x00]).unwrap(), 496);
    }

    #[test]
    fn capacity_requires_ndef_magic() {
        assert!(matches!(
            capacity_from_cc(&[0x00, 0x10, 0x12, 0x00]),
            Err(IoError::NotFormatted)
        ));
        assert!(matches!(capacity_from_cc(&[0xE1, 0x10]), Err(IoError::NotFormatted)));
    }

    #[test]
    fn pages_start_at_page_four_and_pad_the_tail() {
        let tlv = [0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE];
        let pages = pages(&tlv).unwrap();
        assert_eq!(
            pages,
            vec![(4, [0x03, 0x03, 0xD0, 0x00]), (5, [0x00, 0xFE, 0x00, 0x00])]
        );
    }

    #[test]
    fn pages_reject_data_past_page_255() {
        let tlv = vec![0u8; (256 - 4) * 4 + 1];
        assert!(matches!(pages(&tlv), Err(IoError::Capacity { .. })));
        assert_eq!(pages(&tlv[..tlv.len() - 1]).unwrap().last().unwrap().0, 255);
    }

    #[test]
    fn write_order_sets_length_last() {
        let tlv = ndef::wrap_in_tlv(&[0xAA; 6]).unwrap();
        let order = write_order(&tlv).unwrap();
        let pages: Vec<u8> = order.iter().map(|(p, _)| *p).collect();
        assert_eq!(pages, vec![4, 5, 6, 4]);
        assert_eq!(order[0].1, [0x03, 0x00, 0xAA, 0xAA]);
        assert_eq!(order[3].1, [0x03, 0x06, 0xAA, 0xAA]);
    }

    #[test]
    fn write_order_clears_long_length() {
        let tlv = ndef::wrap_in_tlv(&[0x11; 300]).unwrap();
        let order = write_order(&tlv).unwrap();
        assert_eq!(order[0].1, [0x03, 0xFF, 0x00, 0x00]);
        assert_eq!(order.last().unwrap().1, [0x03, 0xFF, 0x01, 0x2C]);
    }

    #[test]
    fn write_order_single_page_written_once() {
        let tlv = ndef::wrap_in_tlv(&[]).unwrap();
        assert_eq!(write_order(&tlv).unwrap(), vec![(4, [0x03, 0x00, 0xFE, 0x00])]);
    }

    #[test]
    fn pulled_mid_write_leaves_empty_message() {
        let mut tag = MemoryTag::holding(b"\xD1\x01\x03T\x00ab");
        tag.pull_after = Some(2);

        let err = with_connection(&mut tag, |t| t.write_message(&[0x55; 20])).unwrap_err();
        assert!(matches!(err, IoError::CardRemoved));
        assert_eq!(tag.page_writes, vec![4, 5]);

        with_connection(&mut tag, |t| {
            assert_eq!(t.read_message()?, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn close_runs_after_success() {
        let mut tag = MemoryTag::blank(64);
        with_connection(&mut tag, |t| t.write_message(b"\xD1\x01\x00T")).unwrap();
        assert_eq!(tag.connects, 1);
        assert_eq!(tag.closes, 1);
        assert!(!tag.connected);
    }

    #[test]
    fn close_runs_after_write_failure() {
        let mut tag = MemoryTag::blank(64);
        tag.fail_writes = true;
        let err = with_connection(&mut tag, |t| t.write_message(b"x")).unwrap_err();
        assert!(matches!(err, IoError::CardRemoved));
        assert_eq!(tag.closes, 1);
    }

    #[test]
    fn close_runs_after_format_failure() {
        let mut tag = MemoryTag::blank(64);
        tag.memory = vec![0x03, 0x09, 0xD1];
        let err = with_connection(&mut tag, |t| t.read_message()).unwrap_err();
        assert!(matches!(err, IoError::Format(FormatError::Truncated(_))));
        assert_eq!(tag.closes, 1);
    }

    #[test]
    fn capacity_checked_before_write() {
        let mut tag = MemoryTag::blank(8);
        let err = with_connection(&mut tag, |t| t.write_message(&[0u8; 16])).unwrap_err();
        assert!(matches!(
            err,
            IoError::Capacity {
                needed: 19,
                available: 8
            }
        ));
        assert!(tag.page_writes.is_empty());
    }
}
