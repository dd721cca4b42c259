mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use chat_core::{ChatCommand, ChatEvent, MessageKind};
use chat_platform::{InMemoryKeyValueStore, JsonFileStore};
use chat_waku::{ChatRuntimeHandle, EventStream, InMemoryRelay, spawn_runtime};
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::SmokeConfig;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(2);
        }
    };

    if let Err(message) = run(config).await {
        error!(%message, "smoke run failed");
        eprintln!("Smoke run failed: {message}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), String> {
    let alice_node = InMemoryRelay::new();
    let bob_node = alice_node.peer();
    let alice_store = JsonFileStore::new(&config.store_path);
    info!(
        channel = %config.options.channel_name,
        store = %alice_store.path().display(),
        "starting two in-process peers"
    );

    let alice = spawn_runtime(Arc::new(alice_node), alice_store, config.options.clone());
    let bob = spawn_runtime(
        Arc::new(bob_node),
        InMemoryKeyValueStore::default(),
        config.options.clone(),
    );
    let mut alice_events = alice.subscribe();
    let mut bob_events = bob.subscribe();

    let room = connect(&alice, &mut alice_events).await?;
    connect(&bob, &mut bob_events).await?;
    println!("Both peers joined '{room}'.");

    send_text(&alice, "tx-alice-1", "hello from alice").await?;
    let seen = wait_for_text(&mut bob_events, "hello from alice").await?;
    println!("Bob sees {seen} message(s).");

    send_text(&bob, "tx-bob-1", "hi alice").await?;
    let seen = wait_for_text(&mut alice_events, "hi alice").await?;
    println!("Alice sees {seen} message(s).");

    for handle in [&alice, &bob] {
        handle
            .send(ChatCommand::Disconnect)
            .await
            .map_err(|err| err.to_string())?;
    }
    println!("Smoke run finished.");
    Ok(())
}

async fn connect(handle: &ChatRuntimeHandle, events: &mut EventStream) -> Result<String, String> {
    handle
        .send(ChatCommand::Connect)
        .await
        .map_err(|err| err.to_string())?;

    loop {
        match next_event(events).await? {
            ChatEvent::RoomChanged { room, topic } => {
                info!(%room, %topic, "peer joined room");
                return Ok(room);
            }
            ChatEvent::Error { code, message, .. } => {
                return Err(format!("connect failed ({code}): {message}"));
            }
            _ => {}
        }
    }
}

async fn send_text(handle: &ChatRuntimeHandle, txn_id: &str, text: &str) -> Result<(), String> {
    handle
        .send(ChatCommand::SendMessage {
            client_txn_id: txn_id.to_owned(),
            data: text.to_owned(),
            kind: MessageKind::Text,
            response_to: None,
        })
        .await
        .map_err(|err| err.to_string())
}

/// Wait until the feed contains `text`; returns the feed length.
async fn wait_for_text(events: &mut EventStream, text: &str) -> Result<usize, String> {
    loop {
        if let ChatEvent::TimelineUpdated { messages, .. } = next_event(events).await?
            && messages.iter().any(|message| message.data == text)
        {
            return Ok(messages.len());
        }
    }
}

async fn next_event(events: &mut EventStream) -> Result<ChatEvent, String> {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .map_err(|_| "timed out waiting for chat event".to_owned())?
        .map_err(|err| err.to_string())
}
