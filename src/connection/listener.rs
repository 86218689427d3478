//! Listener event loop: connect, authorize, then parse and dispatch inbound
//! messages until stopped

use super::handle::LoopShared;
use super::{ConnectionStatus, Inner};
use crate::broadcast::Broadcaster;
use crate::protocol::ack_message;
use crate::transport::{InboundMessage, Role, Transport};
use crate::types::SignalKind;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub(super) async fn run(
    inner: Arc<Inner>,
    transport: Arc<dyn Transport>,
    shared: Arc<LoopShared>,
    mut stop: oneshot::Receiver<()>,
) {
    if let Some(store) = inner.rules.clone() {
        if let Err(e) = inner.parser.reload_from(store.as_ref()).await {
            warn!("Custom pattern rules not loaded: {}", e);
        }
    }

    if let Err(e) = transport.connect().await {
        error!("Listener failed to connect: {}", e);
        inner.startup_failed(ConnectionStatus::Error(e.to_string()));
        return;
    }
    match transport.is_user_authorized().await {
        Ok(true) => {}
        Ok(false) => {
            warn!("Listener session is not authorized");
            transport.disconnect().await;
            inner.startup_failed(ConnectionStatus::AuthRequired);
            return;
        }
        Err(e) => {
            error!("Authorization check failed: {}", e);
            transport.disconnect().await;
            inner.startup_failed(ConnectionStatus::Error(e.to_string()));
            return;
        }
    }
    shared.connected.store(true, Ordering::SeqCst);
    inner.emit(ConnectionStatus::Connected);

    let mut inbound = match transport.subscribe().await {
        Ok(rx) => rx,
        Err(e) => {
            error!("Failed to subscribe to updates: {}", e);
            shared.connected.store(false, Ordering::SeqCst);
            inner.startup_failed(ConnectionStatus::Error(e.to_string()));
            return;
        }
    };

    let broadcaster = Broadcaster::spawn(
        Role::Listener,
        Arc::clone(&transport),
        Arc::clone(&inner.audit),
        inner.config.broadcast.clone(),
    );
    let _ = shared.broadcaster.set(Arc::clone(&broadcaster));
    inner.starting.store(false, Ordering::SeqCst);
    inner.emit(ConnectionStatus::Listening);

    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!("Listener stop requested");
                break;
            }
            message = inbound.recv() => match message {
                Some(message) => handle_message(&inner, &broadcaster, message).await,
                None => {
                    warn!("Inbound stream closed");
                    shared.connected.store(false, Ordering::SeqCst);
                    inner.running.store(false, Ordering::SeqCst);
                    inner.emit(ConnectionStatus::Error("inbound stream closed".into()));
                    break;
                }
            }
        }
    }
    info!("Listener loop exited");
}

async fn handle_message(inner: &Inner, broadcaster: &Broadcaster, message: InboundMessage) {
    let received = Instant::now();

    let accepted = {
        let monitored = inner.monitored.read();
        monitored.is_empty() || monitored.contains(&message.chat_id)
    };
    if !accepted {
        return;
    }

    let on_message = inner.callbacks.read().on_message.clone();
    if let Some(callback) = on_message {
        callback(&message);
    }

    let Some(signal) = inner.parser.parse(&message.text) else {
        return;
    };
    let signal = signal.with_origin(message.chat_id, message.sender_id);

    if let SignalKind::Ack(ack) = &signal.kind {
        match inner.audit.mark_acked(ack.telegram_msg_id).await {
            Ok(true) => debug!("Broadcast {} acknowledged", ack.telegram_msg_id),
            Ok(false) => debug!("ACK for unknown message {}", ack.telegram_msg_id),
            Err(e) => warn!("Failed to record ACK {}: {}", ack.telegram_msg_id, e),
        }
        return;
    }

    let copy_instruction = signal.kind.is_copy_instruction();
    let kind = signal.kind.name();
    let on_signal = inner.callbacks.read().on_signal.clone();
    if let Some(callback) = on_signal {
        callback(signal);
    }
    info!(
        kind,
        chat_id = message.chat_id,
        latency_ms = received.elapsed().as_millis() as u64,
        "Signal dispatched"
    );

    if copy_instruction && inner.config.listener.auto_ack {
        let ack = ack_message(message.message_id);
        if let Err(e) = broadcaster.submit_ack(message.chat_id, &ack).await {
            warn!("Failed to queue ACK for {}: {}", message.message_id, e);
        }
    }
}
