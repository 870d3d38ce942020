mod apdu;
mod config;
mod ndef;
mod nfc_service;
mod session;
mod tag_io;
mod text_record;
mod types;
mod ws;

use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

use crate::config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            env_logger::init();
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    info!("Starting NFC Text Service...");
    if let Ok(json) = serde_json::to_string(&config) {
        info!("Configuration: {}", json);
    }

    // WS -> NFC commands. Crossbeam because the NFC thread blocks.
    let (cmd_tx, cmd_rx) = unbounded::<types::NfcCommand>();

    // NFC -> WS events, fanned out to clients.
    let (event_tx, event_rx) = broadcast::channel::<types::OutgoingMessage>(100);

    let nfc_config = config.clone();
    std::thread::spawn(move || {
        let (bridge_tx, bridge_rx) = unbounded::<types::OutgoingMessage>();

        std::thread::spawn(move || {
            nfc_service::run(nfc_config, bridge_tx, cmd_rx);
        });

        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    ws::start_server(config.bind_addr, cmd_tx, event_rx).await;
}
