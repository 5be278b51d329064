use crossbeam_channel::unbounded;
use log::{error, info};
use nfc_tag_service::{config, nfc_service, types, ws};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("Starting NFC tag service with {:?}", config);

    // Channel: WS -> NFC (Commands)
    // We use Crossbeam (Sync) because NFC thread is blocking
    let (cmd_tx, cmd_rx) = unbounded::<types::NfcCommand>();

    // Channel: NFC -> WS (Events), fanned out to every client
    let (event_tx, _) = broadcast::channel::<types::OutgoingMessage>(100);

    // NFC thread -> bridge thread -> broadcast
    let (bridge_tx, bridge_rx) = unbounded::<types::OutgoingMessage>();
    let nfc_config = config.clone();
    std::thread::spawn(move || {
        nfc_service::run(bridge_tx, cmd_rx, nfc_config);
    });

    let event_tx_clone = event_tx.clone();
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            // No subscribers is fine; the event is simply dropped
            let _ = event_tx_clone.send(msg);
        }
    });

    ws::start_server(config.addr, cmd_tx, event_tx).await;
}
