// src/ws.rs
use crate::types::{IncomingMessage, NfcCommand, OutgoingMessage};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::Filter;

pub async fn start_server(
    bind_addr: SocketAddr,
    nfc_cmd_tx: Sender<NfcCommand>,
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // Forward NFC events to every client
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        loop {
            match nfc_event_rx.recv().await {
                Ok(msg) => {
                    let _ = ws_tx_clone.send(msg);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} NFC events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();

            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, ws_tx))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", bind_addr);
    warp::serve(routes).run(bind_addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();

    // Spawn task to send Broadcasts -> Client
    let forward = tokio::spawn(async move {
        while let Ok(msg) = rx_broadcast.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Serializing event failed: {}", e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };

        match parse_command(text) {
            Some(cmd) => {
                if nfc_cmd_tx.send(cmd).is_err() {
                    error!("NFC service is not running");
                    break;
                }
            }
            None => warn!("Ignoring malformed client message"),
        }
    }

    forward.abort();
}

/// Maps a client JSON message to a service command.
fn parse_command(text: &str) -> Option<NfcCommand> {
    match serde_json::from_str::<IncomingMessage>(text).ok()? {
        IncomingMessage::GET_READER_STATUS => Some(NfcCommand::CheckReaderStatus),
        IncomingMessage::WRITE_TEXT { text, language } => {
            Some(NfcCommand::WriteText { text, language })
        }
    }
}
