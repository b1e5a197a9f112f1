//! In-memory record source.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tether_engine::{
    KeyMap, Operation, QueryExpr, Record, RecordBatch, RecordCache, RecordChange, RecordIdentity,
    Schema,
};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::events::{BackgroundError, Notifier, SourceEvent};
use crate::source::Source;

/// Capacity of the change channel. Slow receivers observe `Lagged`.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// The local record source: a [`RecordCache`] behind a lock plus lifecycle
/// events and a change feed.
///
/// The lock is never held across an await point; every write is a single
/// synchronous critical section.
pub struct MemorySource {
    name: String,
    cache: RwLock<RecordCache>,
    keymap: Arc<KeyMap>,
    notifier: Notifier,
    changes: broadcast::Sender<RecordChange>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, schema: Arc<Schema>, keymap: Arc<KeyMap>) -> Self {
        let name = name.into();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            notifier: Notifier::new(name.clone()),
            name,
            cache: RwLock::new(RecordCache::new(schema)),
            keymap,
            changes,
        }
    }

    /// Create a new memory source wrapped in Arc for sharing.
    pub fn new_shared(
        name: impl Into<String>,
        schema: Arc<Schema>,
        keymap: Arc<KeyMap>,
    ) -> Arc<Self> {
        Arc::new(Self::new(name, schema, keymap))
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(self.read().schema())
    }

    pub fn keymap(&self) -> &Arc<KeyMap> {
        &self.keymap
    }

    pub fn get(&self, identity: &RecordIdentity) -> Option<Arc<Record>> {
        self.read().get(identity)
    }

    /// Look a record up by its remote key without triggering any event.
    pub fn find_by_key(
        &self,
        type_name: &str,
        key_field: &str,
        value: &str,
    ) -> Result<Option<Arc<Record>>> {
        Ok(self
            .read()
            .find_by_key(type_name, key_field, value, &self.keymap)?)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Merge a record through the regular update path.
    pub async fn upsert(&self, record: Record) -> Result<RecordBatch> {
        self.update(&Operation::update_record(record)).await
    }

    /// Remove a record through the regular update path.
    pub async fn delete(&self, identity: RecordIdentity) -> Result<RecordBatch> {
        self.update(&Operation::remove_record(identity)).await
    }

    /// Receive every inserted, updated or removed record.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RecordChange> {
        self.changes.subscribe()
    }

    /// Receive errors raised by non-blocking listeners on this source.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<BackgroundError> {
        self.notifier.subscribe_errors()
    }

    fn publish(&self, changes: Vec<RecordChange>) {
        for change in changes {
            tracing::debug!(source = %self.name, record = %change.identity(), "Record changed");
            // Nobody listening is fine
            let _ = self.changes.send(change);
        }
    }

    fn merge(&self, batch: &RecordBatch) -> Result<Vec<RecordChange>> {
        let records = batch.records.iter().map(|r| Record::clone(r));
        Ok(self.write().upsert_all(records)?)
    }

    fn apply(&self, operation: &Operation) -> Result<RecordBatch> {
        let mut cache = self.write();
        let change = cache.apply(operation)?;
        let current = cache.get(&operation.record());
        drop(cache);

        self.publish(change.into_iter().collect());
        Ok(RecordBatch::from_primary(current.into_iter().collect()))
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn query(&self, query: &QueryExpr) -> Result<RecordBatch> {
        self.notifier
            .emit(SourceEvent::BeforeQuery(query.clone()))
            .await?;

        let result = self.read().query(query)?;

        self.notifier
            .emit(SourceEvent::AfterQuery(query.clone(), result.clone()))
            .await?;
        Ok(result)
    }

    async fn update(&self, operation: &Operation) -> Result<RecordBatch> {
        self.notifier
            .emit(SourceEvent::BeforeUpdate(operation.clone()))
            .await?;

        let result = self.apply(operation)?;

        self.notifier
            .emit(SourceEvent::AfterUpdate(operation.clone(), result.clone()))
            .await?;
        Ok(result)
    }

    async fn sync(&self, batch: &RecordBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let changes = self.merge(batch)?;
        tracing::debug!(
            source = %self.name,
            records = batch.len(),
            changed = changes.len(),
            "Merged batch"
        );
        self.publish(changes);
        Ok(())
    }
}

impl std::fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{listener, EventKind};
    use serde_json::json;
    use std::sync::Mutex;
    use tether_engine::{FieldType, ModelDescription};

    fn memory() -> MemorySource {
        let schema = Schema::derive([
            (
                "planet",
                ModelDescription::new()
                    .key("remoteId")
                    .attr("name", FieldType::String)
                    .has_many("moons", "moon"),
            ),
            (
                "moon",
                ModelDescription::new()
                    .key("remoteId")
                    .attr("name", FieldType::String)
                    .has_one("planet", "planet"),
            ),
        ])
        .unwrap();
        MemorySource::new("memory", Arc::new(schema), Arc::new(KeyMap::new()))
    }

    fn jupiter() -> Record {
        Record::new("planet", "p1")
            .with_key("remoteId", "12345")
            .with_attribute("name", json!("Jupiter"))
    }

    #[tokio::test]
    async fn update_emits_before_and_after() {
        let source = memory();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for kind in [EventKind::BeforeUpdate, EventKind::AfterUpdate] {
            let log = Arc::clone(&log);
            subs.push(source.notifier().subscribe(
                kind,
                true,
                listener(move |event| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push((event.kind(), event.result().map(|b| b.len())));
                        Ok(())
                    }
                }),
            ));
        }

        source.upsert(jupiter()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![(EventKind::BeforeUpdate, None), (EventKind::AfterUpdate, Some(1))]
        );
    }

    #[tokio::test]
    async fn sync_fires_no_events() {
        let source = memory();
        let fired = Arc::new(Mutex::new(0));

        let _sub = {
            let fired = Arc::clone(&fired);
            source.notifier().subscribe(
                EventKind::AfterUpdate,
                true,
                listener(move |_| {
                    let fired = Arc::clone(&fired);
                    async move {
                        *fired.lock().unwrap() += 1;
                        Ok(())
                    }
                }),
            )
        };

        source
            .sync(&RecordBatch::from_primary(vec![Arc::new(jupiter())]))
            .await
            .unwrap();

        assert_eq!(*fired.lock().unwrap(), 0);
        assert!(source.get(&RecordIdentity::new("planet", "p1")).is_some());
    }

    #[tokio::test]
    async fn identical_sync_publishes_nothing() {
        let source = memory();
        let mut changes = source.subscribe_changes();
        let batch = RecordBatch::from_primary(vec![Arc::new(jupiter())]);

        source.sync(&batch).await.unwrap();
        source.sync(&batch).await.unwrap();

        assert!(matches!(changes.recv().await.unwrap(), RecordChange::Inserted(_)));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_batch_leaves_cache_untouched() {
        let source = memory();
        let bad = Record::new("planet", "p2").with_attribute("name", json!(42));
        let batch = RecordBatch::from_primary(vec![Arc::new(jupiter()), Arc::new(bad)]);

        assert!(source.sync(&batch).await.is_err());
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn blocking_before_error_prevents_apply() {
        let source = memory();
        let _sub = source.notifier().subscribe(
            EventKind::BeforeUpdate,
            true,
            listener(|_| async { Err(crate::Error::Unsupported("offline".into())) }),
        );

        assert!(source.upsert(jupiter()).await.is_err());
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn delete_and_find_by_key() {
        let source = memory();
        source.upsert(jupiter()).await.unwrap();

        let found = source.find_by_key("planet", "remoteId", "12345").unwrap();
        assert_eq!(found.unwrap().attribute("name"), Some(&json!("Jupiter")));

        let mut changes = source.subscribe_changes();
        let result = source
            .delete(RecordIdentity::new("planet", "p1"))
            .await
            .unwrap();

        assert!(result.is_empty());
        assert!(matches!(changes.recv().await.unwrap(), RecordChange::Removed(_)));
        assert!(source.find_by_key("planet", "remoteId", "12345").unwrap().is_none());
    }
}
