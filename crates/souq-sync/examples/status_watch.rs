//! Minimal status watcher: connects to a sync endpoint, logs every inbound
//! change, and prints the connectivity snapshot every few seconds.
//!
//! ```sh
//! cargo run --example status_watch -- ws://127.0.0.1:8080/live my-token
//! ```

use std::time::Duration;

use souq_sync::{ControlKind, EventKey, SyncConfig, SyncEngine, SyncEvent};

#[tokio::main]
async fn main() -> souq_sync::SyncResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080/live".to_string());
    let token = args.next().unwrap_or_default();

    let handle = SyncEngine::spawn(SyncConfig::load_or_default(None));

    let _changes = handle.on_update(EventKey::Wildcard, |event| {
        if let SyncEvent::Change(msg) = event {
            println!("change: {} {} {}", msg.kind, msg.entity_type, msg.entity_id);
        }
    });
    let _failed = handle.on_update(EventKey::Control(ControlKind::ConnectionFailed), |_| {
        eprintln!("sync unavailable: reconnect budget exhausted, run again to retry");
    });

    handle.connect(&endpoint, &token).await?;

    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let state = handle.sync_state().await;
        println!(
            "online={} quality={} pending={}",
            state.is_online, state.connection_quality, state.pending_changes
        );
    }
}
