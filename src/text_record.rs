// src/text_record.rs
//! NDEF Text record payload codec (RTD Text).
//!
//! Payload layout: `[status] ++ language ++ text`, where the status byte packs
//! the encoding flag (bit 7) and the language code length (bits 5-0).

use std::str;

use thiserror::Error;

pub const DEFAULT_LANGUAGE: &str = "en";
pub const MAX_LANGUAGE_LEN: usize = 0x3F;

const ENCODING_MASK: u8 = 0x80;
const LANGUAGE_LEN_MASK: u8 = 0x3F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16,
}

impl TextEncoding {
    fn from_status(status: u8) -> Self {
        if status & ENCODING_MASK == 0 {
            TextEncoding::Utf8
        } else {
            TextEncoding::Utf16
        }
    }

    fn status_bit(self) -> u8 {
        match self {
            TextEncoding::Utf8 => 0x00,
            TextEncoding::Utf16 => ENCODING_MASK,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16 => "UTF-16",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    encoding: TextEncoding,
    language_code: String,
    text: String,
}

impl TextRecord {
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("text payload truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[error("text bytes are not valid {0}")]
    BadEncoding(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("language code is {0} bytes, at most 63 allowed")]
    LanguageCodeTooLong(usize),
    #[error("language code must be ASCII")]
    NonAsciiLanguageCode,
}

pub fn decode(payload: &[u8]) -> Result<TextRecord, DecodeError> {
    let Some(&status) = payload.first() else {
        return Err(DecodeError::Truncated {
            needed: 1,
            available: 0,
        });
    };

    let encoding = TextEncoding::from_status(status);
    let lang_len = (status & LANGUAGE_LEN_MASK) as usize;

    let text_start = 1 + lang_len;
    if payload.len() < text_start {
        return Err(DecodeError::Truncated {
            needed: text_start,
            available: payload.len(),
        });
    }

    let lang_bytes = &payload[1..text_start];
    if !lang_bytes.is_ascii() {
        return Err(DecodeError::BadEncoding("ASCII"));
    }
    // ASCII is always valid UTF-8
    let language_code = String::from_utf8_lossy(lang_bytes).into_owned();

    let text_bytes = &payload[text_start..];
    let text = match encoding {
        TextEncoding::Utf8 => str::from_utf8(text_bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::BadEncoding(encoding.as_str()))?,
        TextEncoding::Utf16 => decode_utf16(text_bytes)?,
    };

    Ok(TextRecord {
        encoding,
        language_code,
        text,
    })
}

fn decode_utf16(bytes: &[u8]) -> Result<String, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::BadEncoding("UTF-16"));
    }

    // BOM picks the byte order; without one the NFC Forum default is big-endian.
    let (body, little_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => (bytes, false),
    };

    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });

    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| DecodeError::BadEncoding("UTF-16"))
}

/// Builds a UTF-8 text payload. The encoding bit is always clear.
pub fn encode(text: &str, language: &str) -> Result<Vec<u8>, EncodeError> {
    encode_with(text, language, TextEncoding::Utf8)
}

/// Builds a text payload in the requested encoding. UTF-16 is written
/// big-endian without a byte-order mark.
pub fn encode_with(
    text: &str,
    language: &str,
    encoding: TextEncoding,
) -> Result<Vec<u8>, EncodeError> {
    validate_language(language)?;

    let lang = language.as_bytes();
    let mut payload = Vec::with_capacity(1 + lang.len() + text.len());
    payload.push(encoding.status_bit() | lang.len() as u8);
    payload.extend_from_slice(lang);

    match encoding {
        TextEncoding::Utf8 => payload.extend_from_slice(text.as_bytes()),
        TextEncoding::Utf16 => {
            for unit in text.encode_utf16() {
                payload.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }

    Ok(payload)
}

pub fn validate_language(language: &str) -> Result<(), EncodeError> {
    if language.len() > MAX_LANGUAGE_LEN {
        return Err(EncodeError::LanguageCodeTooLong(language.len()));
    }
    if !language.is_ascii() {
        return Err(EncodeError::NonAsciiLanguageCode);
    }
    Ok(())
}
