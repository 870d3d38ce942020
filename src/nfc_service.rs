// src/nfc_service.rs
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, ReaderState, Scope, State};
use std::ffi::CString;
use std::time::Duration;

use crate::config::Config;
use crate::session::{Session, SessionError};
use crate::tag_io::{IoError, PcscTag};
use crate::text_record::TextRecord;
use crate::types::{self, NfcCommand, OutgoingMessage};

/// One connected reader and the session for whatever tag sits on it.
struct ReaderSlot<'ctx> {
    name: CString,
    session: Session<PcscTag<'ctx>>,
}

pub fn run(config: Config, tx: Sender<OutgoingMessage>, rx: Receiver<NfcCommand>) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::READER_ERROR {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut readers_buf = [0; 2048];
    let mut slots: Vec<ReaderSlot> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(config.poll_interval(), &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. CHECK FOR COMMANDS
        loop {
            match rx.try_recv() {
                Ok(NfcCommand::WriteText { text, language }) => {
                    info!(
                        "Received write command ({} bytes, lang {})",
                        text.len(),
                        language.as_deref().unwrap_or(&config.language)
                    );
                    let tag_text = config.tag_text(&text);
                    let _ = tx.send(handle_write_command(&mut slots, &tag_text, language.as_deref()));
                }
                Ok(NfcCommand::CheckReaderStatus) => {
                    let _ = tx.send(OutgoingMessage::READER_STATUS {
                        success: !slots.is_empty(),
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Command channel closed, stopping NFC service");
                    return;
                }
            }
        }

        // 3. PROCESS EVENTS
        let mut readers_changed = false;

        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        for (rs, slot) in reader_states[1..].iter_mut().zip(slots.iter_mut()) {
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }
            let current = rs.event_state();

            if current.intersects(State::PRESENT) && !rs.current_state().intersects(State::PRESENT) {
                info!("Card Inserted on {:?}", slot.name);
                let _ = tx.send(OutgoingMessage::CARD_STATUS {
                    success: true,
                    message: "Card detected!".into(),
                });
                slot.session.attach(PcscTag::new(&ctx, &slot.name));
                let _ = tx.send(read_event(slot.session.read_text()));
            }

            if current.intersects(State::EMPTY) && rs.current_state().intersects(State::PRESENT) {
                info!("Card Removed from {:?}", slot.name);
                slot.session.detach();
                let _ = tx.send(OutgoingMessage::CARD_STATUS {
                    success: false,
                    message: "Card removed!".into(),
                });
            }

            rs.sync_current_state();
        }

        // 4. REFRESH LIST
        if readers_changed {
            reader_states.truncate(1);
            slots.clear();

            match ctx.list_readers(&mut readers_buf) {
                Ok(iter) => {
                    for name in iter {
                        reader_states.push(ReaderState::new(name.to_owned(), State::UNAWARE));
                        slots.push(ReaderSlot {
                            name: name.to_owned(),
                            session: Session::new(config.language.clone()),
                        });
                    }
                    info!("{} reader(s) connected", slots.len());
                }
                Err(err) => warn!("Listing readers failed: {}", err),
            }

            let _ = tx.send(OutgoingMessage::READER_STATUS {
                success: !slots.is_empty(),
            });
        }
    }
}

fn handle_write_command(
    slots: &mut [ReaderSlot],
    text: &str,
    language: Option<&str>,
) -> OutgoingMessage {
    let Some(slot) = slots.iter_mut().find(|s| s.session.has_tag()) else {
        return write_event(Err(SessionError::NoTagPresent));
    };

    let result = slot.session.write_command(text, language);

    if let Err(e) = &result {
        error!("Write on {:?} failed: {}", slot.name, e);
    }
    write_event(result)
}

fn read_event(result: Result<Option<TextRecord>, SessionError>) -> OutgoingMessage {
    match result {
        Ok(Some(record)) => OutgoingMessage::DATA_READ_SUCCESS {
            data: record.text().to_string(),
            language: record.language_code().to_string(),
            encoding: record.encoding().as_str().to_string(),
        },
        Ok(None) => OutgoingMessage::DATA_READ_EMPTY,
        Err(e) => {
            warn!("Reading tag failed: {}", e);
            OutgoingMessage::DATA_READ_ERROR {
                error: e.to_string(),
            }
        }
    }
}

fn write_event(result: Result<(), SessionError>) -> OutgoingMessage {
    match result {
        Ok(()) => OutgoingMessage::DATA_WRITE_SUCCESS {
            message: types::WRITE_SUCCESS.into(),
        },
        Err(SessionError::NoTagPresent) | Err(SessionError::Io(IoError::CardRemoved)) => {
            OutgoingMessage::DATA_WRITE_ERROR {
                error: types::NO_TAG_DETECTED.into(),
            }
        }
        Err(e) => OutgoingMessage::DATA_WRITE_ERROR {
            error: types::write_error_message(&e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_record::{self, DecodeError, EncodeError};

    #[test]
    fn read_success_event_carries_language_and_encoding() {
        let record = text_record::decode(b"\x02dehallo").unwrap();
        assert_eq!(
            read_event(Ok(Some(record))),
            OutgoingMessage::DATA_READ_SUCCESS {
                data: "hallo".into(),
                language: "de".into(),
                encoding: "UTF-8".into(),
            }
        );
    }

    #[test]
    fn read_without_content_is_empty_event() {
        assert_eq!(read_event(Ok(None)), OutgoingMessage::DATA_READ_EMPTY);
    }

    #[test]
    fn read_error_event() {
        let err = SessionError::Decode(DecodeError::BadEncoding("UTF-8"));
        assert_eq!(
            read_event(Err(err)),
            OutgoingMessage::DATA_READ_ERROR {
                error: "text bytes are not valid UTF-8".into()
            }
        );
    }

    #[test]
    fn write_events() {
        assert_eq!(
            write_event(Ok(())),
            OutgoingMessage::DATA_WRITE_SUCCESS {
                message: "Tag written successfully!".into()
            }
        );
        assert_eq!(
            write_event(Err(SessionError::NoTagPresent)),
            OutgoingMessage::DATA_WRITE_ERROR {
                error: "No NFC Tag detected".into()
            }
        );
        assert_eq!(
            write_event(Err(SessionError::Encode(EncodeError::LanguageCodeTooLong(70)))),
            OutgoingMessage::DATA_WRITE_ERROR {
                error: "Error during writing, Try Again! Error is : language code is 70 bytes, at most 63 allowed".into()
            }
        );
    }

    #[test]
    fn write_without_readers_reports_no_tag() {
        assert_eq!(
            handle_write_command(&mut [], "hi", None),
            OutgoingMessage::DATA_WRITE_ERROR {
                error: "No NFC Tag detected".into()
            }
        );
    }
}
