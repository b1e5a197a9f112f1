//! The source abstraction shared by the local cache and the remote server.

use async_trait::async_trait;
use tether_engine::{Operation, QueryExpr, RecordBatch};

use crate::error::Result;
use crate::events::Notifier;

/// Something records can be queried from and updated through.
///
/// Sources emit `before*`/`after*` events through their [`Notifier`]; the
/// coordinator wires strategies to those events.
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique name used to address the source in strategies.
    fn name(&self) -> &str;

    fn notifier(&self) -> &Notifier;

    /// Run a query and return its normalized result.
    async fn query(&self, query: &QueryExpr) -> Result<RecordBatch>;

    /// Apply an operation and return the records it produced.
    async fn update(&self, operation: &Operation) -> Result<RecordBatch>;

    /// Merge a batch produced elsewhere. Never emits lifecycle events.
    async fn sync(&self, batch: &RecordBatch) -> Result<()>;
}
