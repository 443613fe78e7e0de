mod logging;

use std::env;

use tidings_core::{Session, SyncEvent};
use tidings_gateway::{GatewayConfig, SyncEngine};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    logging::init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    let Some(session_id) = config.session_id.clone() else {
        println!("Gateway configured at {}.", config.api_base_url);
        println!("Set TIDINGS_SESSION_ID to run a live smoke against it.");
        return;
    };

    let engine = match SyncEngine::new(&config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Failed to initialize engine: {err}");
            std::process::exit(1);
        }
    };

    let mut events = engine.subscribe();
    if let Err(err) = engine.start(Session::authenticated(session_id)).await {
        eprintln!("Failed to start session: {err}");
        std::process::exit(1);
    }

    match engine.load_dialogs().await {
        Ok(count) => info!(count, "dialogs loaded"),
        Err(err) => warn!(error = %err, "dialog listing failed"),
    }

    let first = engine
        .cache()
        .read(|cache| cache.dialogs().first().map(|dialog| dialog.id));
    if let Some(conversation_id) = first {
        match engine.open_conversation(conversation_id).await {
            Ok(count) => info!(conversation_id, count, "conversation opened"),
            Err(err) => warn!(conversation_id, error = %err, "history load failed"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::ChannelState { state }) => info!(?state, "push channel"),
                Ok(SyncEvent::Error { code, message, .. }) => error!(code, message, "sync error"),
                Ok(event) => info!(?event, "sync event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.logout().await;
}
