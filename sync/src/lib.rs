//! # Tether Sync
//!
//! Keeps a local record store consistent with a JSON:API server.
//!
//! Two [`Source`]s do the work: a [`MemorySource`] holding normalized records
//! and a [`JsonApiSource`] talking to the server. A [`Coordinator`] wires
//! them together with [`Strategy`] rules (forward local queries and updates
//! to the remote, merge remote results back), and the [`Store`] façade reads
//! and writes through the memory source.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_engine::{FieldType, KeyMap, ModelDescription, Schema};
//! use tether_sync::{
//!     Coordinator, JsonApiSource, MemorySource, RecordSelector, RemoteConfig, Source, Store,
//!     Strategy,
//! };
//!
//! # async fn run() -> tether_sync::Result<()> {
//! let schema = Arc::new(
//!     Schema::derive([(
//!         "planet",
//!         ModelDescription::new()
//!             .key("remoteId")
//!             .attr("name", FieldType::String),
//!     )])
//!     .map_err(tether_engine::Error::from)?,
//! );
//! let keymap = Arc::new(KeyMap::new());
//!
//! let memory = MemorySource::new_shared("memory", schema.clone(), keymap.clone());
//! let remote = Arc::new(JsonApiSource::new(
//!     "remote",
//!     &RemoteConfig::new("https://api.example.com"),
//!     schema,
//!     keymap,
//! )?);
//!
//! let coordinator = Coordinator::new([memory.clone() as Arc<dyn Source>, remote]);
//! coordinator.add_strategies(Strategy::remote_backed("memory", "remote"))?;
//! coordinator.activate()?;
//!
//! let store = Store::new(memory);
//! let jupiter = store
//!     .find_record(RecordSelector::by_key("planet", "remoteId", "12345"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod memory;
pub mod remote;
pub mod source;
pub mod store;
pub mod strategy;

pub use config::{Config, ConfigError, RemoteConfig};
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use events::{BackgroundError, EventKind, Listener, Notifier, SourceEvent, Subscription};
pub use memory::MemorySource;
pub use remote::{JsonApiSource, JSONAPI_MEDIA_TYPE};
pub use source::Source;
pub use store::{RecordSelector, RecordView, Store};
pub use strategy::{Action, Strategy};
