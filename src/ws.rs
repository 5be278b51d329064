// src/ws.rs
use crate::types::{IncomingMessage, NfcCommand, OutgoingMessage};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use warp::Filter;

pub async fn start_server(
    addr: SocketAddr,
    nfc_cmd_tx: Sender<NfcCommand>,
    nfc_event_tx: broadcast::Sender<OutgoingMessage>,
) {
    // Matches root path "/"
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let events = nfc_event_tx.subscribe();

            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, events))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", addr);
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    mut events: broadcast::Receiver<OutgoingMessage>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();

    // Spawn task to send Broadcasts -> Client
    tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagging, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Could not serialize {:?}: {}", msg, e);
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

    // Handle incoming messages from Client
    while let Some(result) = client_ws_rx.next().await {
        let Ok(msg) = result else {
            break;
        };
        let Ok(text) = msg.to_str() else {
            continue;
        };

        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(parsed) => {
                debug!("Incoming {:?}", parsed);
                if nfc_cmd_tx.send(parsed.into()).is_err() {
                    warn!("NFC thread is gone, dropping command");
                }
            }
            Err(e) => warn!("Ignoring malformed message {:?}: {}", text, e),
        }
    }
    debug!("Client disconnected");
}
