//! Tether CLI - fetch one record through a memory source backed by a
//! JSON:API server.
//!
//! Usage: `tether <type> <remote-id>`

use std::sync::Arc;

use tether_engine::KeyMap;
use tether_sync::{
    Config, Coordinator, JsonApiSource, MemorySource, RecordSelector, Source, Store, Strategy,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCAL: &str = "memory";
const REMOTE: &str = "remote";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env first so RUST_LOG set there applies
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(type_arg), Some(remote_id)) = (args.next(), args.next()) else {
        eprintln!("usage: tether <type> <remote-id>");
        std::process::exit(2);
    };

    // Load configuration
    let config = Config::from_env()?;
    let schema = Arc::new(config.load_schema()?);

    let record_type = schema
        .resolve_type(&type_arg)
        .ok_or_else(|| tether_engine::Error::UnknownType(type_arg.clone()))?;
    let selector = match record_type.key_field() {
        Some(key) => RecordSelector::by_key(&record_type.name, key, &remote_id),
        // Keyless types are addressed by the remote id directly
        None => RecordSelector::by_id(&record_type.name, &remote_id),
    };

    tracing::info!(
        remote = %config.remote.base_url(),
        types = schema.types().count(),
        "Starting Tether"
    );

    // Wire sources
    let keymap = Arc::new(KeyMap::new());
    let memory = MemorySource::new_shared(LOCAL, schema.clone(), keymap.clone());
    let remote = Arc::new(JsonApiSource::new(REMOTE, &config.remote, schema, keymap)?);

    let coordinator = Coordinator::new([memory.clone() as Arc<dyn Source>, remote]);
    coordinator.add_strategies(Strategy::remote_backed(LOCAL, REMOTE))?;
    coordinator.activate()?;

    let store = Store::new(memory);
    let found = store.find_record(selector).await?;
    coordinator.deactivate();

    let output = match found {
        Some(view) => serde_json::to_string_pretty(view.record().as_ref())?,
        None => "null".to_string(),
    };
    println!("{output}");

    Ok(())
}
