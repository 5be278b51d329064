// src/nfc_service.rs
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, ReaderState, Scope, State};
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::config::Config;
use crate::driver;
use crate::error::NfcError;
use crate::pcsc_tag::PcscTag;
use crate::report;
use crate::tag::TagHandle;
use crate::types::{Dispatch, NfcCommand, OutgoingMessage};

pub fn run(tx: Sender<OutgoingMessage>, rx: Receiver<NfcCommand>, config: Config) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::ReaderError {
                error: err.to_string(),
            });
            return;
        }
    };

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut dispatch = Dispatch::default();

    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(config.poll_interval, &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
        }

        // 2. CHECK FOR COMMANDS
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                NfcCommand::SetMode(next) => {
                    if let Dispatch::ForegroundWrite { text } = &next {
                        if text.is_empty() {
                            warn!("Write requested with empty text");
                            let _ = tx.send(OutgoingMessage::DataWriteError {
                                error: report::EMPTY_WRITE_TEXT.into(),
                            });
                            continue;
                        }
                    }

                    info!("Dispatch mode: {:?}", next.mode());
                    dispatch = next;
                    let _ = tx.send(OutgoingMessage::ModeChanged {
                        mode: dispatch.mode(),
                    });

                    if let Dispatch::ForegroundWrite { text } = &dispatch {
                        write_to_present_card(&ctx, &reader_names, &config.language_code, text, &tx);
                    }
                }
                NfcCommand::CheckReaderStatus => {
                    let success =
                        refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states);
                    let _ = tx.send(OutgoingMessage::ReaderStatus { success });
                }
            }
        }

        // 3. PROCESS EVENTS
        let mut readers_changed = false;

        // Check PnP (Index 0)
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        // Check Readers (Indices 1..)
        for i in 1..reader_states.len() {
            let rs = &reader_states[i];
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }
            let Some(name) = reader_names.get(i - 1).cloned() else {
                continue;
            };
            let current = rs.event_state();

            // Card Inserted
            if current.intersects(State::PRESENT) && !rs.current_state().intersects(State::PRESENT)
            {
                info!("Card Inserted on {:?}", name);
                handle_card_insertion(&ctx, &name, &dispatch, &config.language_code, &tx);
            }

            // Card Removed
            if current.intersects(State::EMPTY) && rs.current_state().intersects(State::PRESENT) {
                info!("Card Removed from {:?}", name);
                let _ = tx.send(OutgoingMessage::CardStatus {
                    success: false,
                    message: "Card removed!".into(),
                });
            }

            reader_states[i].sync_current_state();
        }

        // 4. REFRESH LIST
        if readers_changed {
            let success =
                refresh_readers(&ctx, &mut readers_buf, &mut reader_names, &mut reader_states);
            let _ = tx.send(OutgoingMessage::ReaderStatus { success });
        }
    }
}

// Names and states always change together: reader_states[i] watches reader_names[i - 1]
fn refresh_readers(
    ctx: &Context,
    readers_buf: &mut [u8],
    reader_names: &mut Vec<CString>,
    reader_states: &mut Vec<ReaderState>,
) -> bool {
    *reader_names = match ctx.list_readers(readers_buf) {
        Ok(iter) => iter.map(CString::from).collect(),
        Err(e) => {
            warn!("Could not list readers: {}", e);
            Vec::new()
        }
    };
    rebuild_reader_states(reader_states, reader_names);
    !reader_names.is_empty()
}

// An unchanged list keeps its states, so a tag already on a reader is not
// reported as inserted again
fn rebuild_reader_states(reader_states: &mut Vec<ReaderState>, reader_names: &[CString]) {
    let unchanged = reader_states.len() == reader_names.len() + 1
        && reader_states[1..]
            .iter()
            .zip(reader_names)
            .all(|(state, name)| state.name() == name.as_c_str());
    if unchanged {
        return;
    }

    // Keep the PnP state (index 0) and drop everything else
    reader_states.truncate(1);
    for name in reader_names {
        reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
    }
}

fn handle_card_insertion(
    ctx: &Context,
    reader_name: &CStr,
    dispatch: &Dispatch,
    language_code: &str,
    tx: &Sender<OutgoingMessage>,
) {
    let _ = tx.send(OutgoingMessage::CardStatus {
        success: true,
        message: "Card detected!".into(),
    });

    let mut tag = match PcscTag::open(ctx, reader_name) {
        Ok(tag) => tag,
        Err(e) => {
            error!("Failed to open tag on {:?}: {}", reader_name, e);
            report_missing_tag(dispatch, tx);
            return;
        }
    };
    info!("Tag detected: {}", hex::encode(tag.id()));

    match dispatch {
        Dispatch::Background => {
            let result = driver::read_tag(&mut tag);
            let content = report::background_text(&result);
            let _ = tx.send(OutgoingMessage::TagNotification {
                title: report::NOTIFICATION_TITLE.into(),
                preview: report::notification_preview(&content),
                content,
            });
        }
        Dispatch::ForegroundRead => {
            let msg = match driver::read_tag(&mut tag) {
                Ok(Some(message)) => OutgoingMessage::DataReadSuccess {
                    record_count: message.records.len(),
                    data: report::foreground_listing(&message),
                },
                Ok(None) => OutgoingMessage::DataReadError {
                    error: NfcError::EmptyTag.to_string(),
                },
                Err(e) => OutgoingMessage::DataReadError {
                    error: e.to_string(),
                },
            };
            let _ = tx.send(msg);
        }
        Dispatch::ForegroundWrite { text } => {
            write_text_to_tag(&mut tag, language_code, text, tx);
        }
    }
}

fn report_missing_tag(dispatch: &Dispatch, tx: &Sender<OutgoingMessage>) {
    let error = NfcError::NoTagPresent.to_string();
    let msg = match dispatch {
        Dispatch::Background => OutgoingMessage::TagNotification {
            title: report::NOTIFICATION_TITLE.into(),
            preview: report::notification_preview(&error),
            content: error,
        },
        Dispatch::ForegroundRead => OutgoingMessage::DataReadError { error },
        Dispatch::ForegroundWrite { .. } => OutgoingMessage::DataWriteError { error },
    };
    let _ = tx.send(msg);
}

fn write_text_to_tag(
    tag: &mut PcscTag,
    language_code: &str,
    text: &str,
    tx: &Sender<OutgoingMessage>,
) {
    let msg = match driver::write_text(tag, language_code, text) {
        Ok((message, outcome)) => OutgoingMessage::DataWriteSuccess {
            message: report::write_confirmation(outcome, &message),
        },
        Err(e) => OutgoingMessage::DataWriteError {
            error: e.to_string(),
        },
    };
    let _ = tx.send(msg);
}

// A tag already sitting on a reader gets written right away
fn write_to_present_card(
    ctx: &Context,
    reader_names: &[CString],
    language_code: &str,
    text: &str,
    tx: &Sender<OutgoingMessage>,
) {
    for name in reader_names {
        if let Ok(mut tag) = PcscTag::open(ctx, name) {
            info!("Writing to tag {} already on {:?}", hex::encode(tag.id()), name);
            write_text_to_tag(&mut tag, language_code, text, tx);
            return;
        }
    }
    info!("No tag on any reader yet, waiting for one");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pnp_only() -> Vec<ReaderState> {
        vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)]
    }

    fn names(list: &[&str]) -> Vec<CString> {
        list.iter().map(|n| CString::new(*n).unwrap()).collect()
    }

    #[test]
    fn states_follow_reader_names() {
        let mut states = pnp_only();
        let readers = names(&["ACS ACR122U 00 00", "Identiv uTrust 01 00"]);
        rebuild_reader_states(&mut states, &readers);

        assert_eq!(states.len(), 3);
        assert_eq!(states[0].name(), PNP_NOTIFICATION());
        for (i, name) in readers.iter().enumerate() {
            assert_eq!(states[i + 1].name(), name.as_c_str());
        }
    }

    #[test]
    fn shrinking_reader_list_drops_stale_states() {
        let mut states = pnp_only();
        rebuild_reader_states(&mut states, &names(&["first", "second"]));
        rebuild_reader_states(&mut states, &names(&["second"]));

        assert_eq!(states.len(), 2);
        assert_eq!(states[1].name(), c"second");

        rebuild_reader_states(&mut states, &[]);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].name(), PNP_NOTIFICATION());
    }

    #[test]
    fn same_reader_list_keeps_card_state() {
        let readers = names(&["ACS ACR122U 00 00"]);
        let mut states = pnp_only();
        states.push(ReaderState::new(readers[0].clone(), State::PRESENT));

        rebuild_reader_states(&mut states, &readers);
        assert_eq!(states.len(), 2);
        assert!(states[1].current_state().intersects(State::PRESENT));

        let swapped = names(&["Identiv uTrust 01 00"]);
        rebuild_reader_states(&mut states, &swapped);
        assert_eq!(states[1].name(), swapped[0].as_c_str());
        assert!(!states[1].current_state().intersects(State::PRESENT));
    }
}
