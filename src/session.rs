// src/session.rs
use log::{debug, info};
use thiserror::Error;

use crate::ndef::{self, FormatError};
use crate::tag_io::{self, IoError, TagIo};
use crate::text_record::{self, DecodeError, EncodeError, TextRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no NFC tag detected")]
    NoTagPresent,
    #[error("session is not in write mode")]
    NotInWriteMode,
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Current tag plus read/write mode for one reader.
pub struct Session<T> {
    mode: Mode,
    tag: Option<T>,
    language: String,
}

impl<T: TagIo> Session<T> {
    pub fn new(language: impl Into<String>) -> Self {
        Session {
            mode: Mode::Read,
            tag: None,
            language: language.into(),
        }
    }

    #[cfg(test)]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn enter_write_mode(&mut self) {
        self.mode = Mode::Write;
    }

    pub fn enter_read_mode(&mut self) {
        self.mode = Mode::Read;
    }

    pub fn attach(&mut self, tag: T) {
        self.tag = Some(tag);
    }

    pub fn detach(&mut self) -> Option<T> {
        self.tag.take()
    }

    pub fn has_tag(&self) -> bool {
        self.tag.is_some()
    }

    /// Reads the first Text record on the tag. `Ok(None)` means no content.
    pub fn read_text(&mut self) -> Result<Option<TextRecord>, SessionError> {
        let tag = self.tag.as_mut().ok_or(SessionError::NoTagPresent)?;

        let Some(message) = tag_io::with_connection(tag, |t| t.read_message())? else {
            debug!("Tag has no NDEF message");
            return Ok(None);
        };

        let records = ndef::parse_records(&message)?;
        let Some(record) = ndef::first_text_record(&records) else {
            debug!("NDEF message has no Text record");
            return Ok(None);
        };

        if let Some(id) = &record.id {
            debug!("Text record id: {}", hex::encode(id));
        }
        debug!("Text payload: {}", hex::encode(&record.payload));
        Ok(Some(text_record::decode(&record.payload)?))
    }

    /// Handles one write request: write mode for its duration only, and the
    /// session language when the request names none.
    pub fn write_command(&mut self, text: &str, language: Option<&str>) -> Result<(), SessionError> {
        self.enter_write_mode();
        let result = match language {
            Some(language) => self.write_text_in(text, language),
            None => self.write_text(text),
        };
        self.enter_read_mode();
        result
    }

    pub fn write_text(&mut self, text: &str) -> Result<(), SessionError> {
        let language = self.language.clone();
        self.write_text_in(text, &language)
    }

    pub fn write_text_in(&mut self, text: &str, language: &str) -> Result<(), SessionError> {
        let tag = self.tag.as_mut().ok_or(SessionError::NoTagPresent)?;
        if self.mode != Mode::Write {
            return Err(SessionError::NotInWriteMode);
        }

        // Encode before touching the tag so a bad language code writes nothing.
        let message = ndef::encode_text_message(text, language)?;
        tag_io::with_connection(tag, |t| t.write_message(&message))?;

        info!("Wrote {} byte NDEF message", message.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_io::mock::MemoryTag;
    use crate::text_record::TextEncoding;

    fn session_with(tag: MemoryTag) -> Session<MemoryTag> {
        let mut session = Session::new("en");
        session.attach(tag);
        session
    }

    #[test]
    fn write_without_tag() {
        let mut session: Session<MemoryTag> = Session::new("en");
        session.enter_write_mode();
        assert!(matches!(
            session.write_text("hi"),
            Err(SessionError::NoTagPresent)
        ));
    }

    #[test]
    fn read_without_tag() {
        let mut session: Session<MemoryTag> = Session::new("en");
        assert!(matches!(session.read_text(), Err(SessionError::NoTagPresent)));
    }

    #[test]
    fn write_requires_write_mode() {
        let mut session = session_with(MemoryTag::blank(64));
        assert!(matches!(
            session.write_text("hi"),
            Err(SessionError::NotInWriteMode)
        ));
        assert_eq!(session.detach().unwrap().connects, 0);
    }

    #[test]
    fn write_then_read() {
        let mut session = session_with(MemoryTag::blank(64));
        session.enter_write_mode();
        session.write_text_in("bonjour", "fr").unwrap();
        session.enter_read_mode();

        let record = session.read_text().unwrap().unwrap();
        assert_eq!(record.text(), "bonjour");
        assert_eq!(record.language_code(), "fr");
        assert_eq!(record.encoding(), TextEncoding::Utf8);

        let tag = session.detach().unwrap();
        assert_eq!(tag.connects, 2);
        assert_eq!(tag.closes, 2);
    }

    #[test]
    fn default_language_used() {
        let mut session = session_with(MemoryTag::blank(64));
        session.enter_write_mode();
        session.write_text("x").unwrap();
        let record = session.read_text().unwrap().unwrap();
        assert_eq!(record.language_code(), "en");
    }

    #[test]
    fn write_command_without_language_uses_session_language() {
        let mut session = Session::new("de");
        session.attach(MemoryTag::blank(64));

        session.write_command("hallo", None).unwrap();
        assert_eq!(session.mode(), Mode::Read);

        let record = session.read_text().unwrap().unwrap();
        assert_eq!(record.language_code(), "de");
        assert_eq!(record.text(), "hallo");
    }

    #[test]
    fn write_command_language_overrides_session_language() {
        let mut session = Session::new("de");
        session.attach(MemoryTag::blank(64));

        session.write_command("salut", Some("fr")).unwrap();
        let record = session.read_text().unwrap().unwrap();
        assert_eq!(record.language_code(), "fr");
    }

    #[test]
    fn write_command_returns_to_read_mode_on_failure() {
        let mut tag = MemoryTag::blank(64);
        tag.fail_writes = true;
        let mut session = session_with(tag);

        assert!(session.write_command("hi", None).is_err());
        assert_eq!(session.mode(), Mode::Read);
    }

    #[test]
    fn bad_language_writes_nothing() {
        let mut session = session_with(MemoryTag::blank(256));
        session.enter_write_mode();
        let lang = "x".repeat(64);
        assert!(matches!(
            session.write_text_in("hi", &lang),
            Err(SessionError::Encode(EncodeError::LanguageCodeTooLong(64)))
        ));
        let tag = session.detach().unwrap();
        assert_eq!(tag.connects, 0);
        assert!(tag.page_writes.is_empty());
    }

    #[test]
    fn blank_tag_reads_as_no_content() {
        let mut session = session_with(MemoryTag::blank(64));
        assert!(session.read_text().unwrap().is_none());
    }

    #[test]
    fn non_text_message_reads_as_no_content() {
        let uri = ndef::encode_record(crate::types::Tnf::WellKnown, b"U", b"\x04example.com", true, true);
        let mut session = session_with(MemoryTag::holding(&uri));
        assert!(session.read_text().unwrap().is_none());
    }

    #[test]
    fn utf16_tag_is_decoded() {
        let payload = text_record::encode_with("hé", "de", TextEncoding::Utf16).unwrap();
        let message = ndef::encode_record(crate::types::Tnf::WellKnown, ndef::RTD_TEXT, &payload, true, true);
        let mut session = session_with(MemoryTag::holding(&message));

        let record = session.read_text().unwrap().unwrap();
        assert_eq!(record.encoding(), TextEncoding::Utf16);
        assert_eq!(record.text(), "hé");
    }

    #[test]
    fn truncated_text_payload_surfaces_decode_error() {
        let message = ndef::encode_record(crate::types::Tnf::WellKnown, ndef::RTD_TEXT, b"\x05en", true, true);
        let mut session = session_with(MemoryTag::holding(&message));
        assert!(matches!(
            session.read_text(),
            Err(SessionError::Decode(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn write_failure_still_closes() {
        let mut tag = MemoryTag::blank(64);
        tag.fail_writes = true;
        let mut session = session_with(tag);
        session.enter_write_mode();

        assert!(matches!(
            session.write_text("hi"),
            Err(SessionError::Io(IoError::CardRemoved))
        ));
        assert_eq!(session.detach().unwrap().closes, 1);
    }
}
