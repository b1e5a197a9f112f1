//! JSON:API remote source.
//!
//! Translates queries and operations into JSON:API requests and normalizes
//! the (possibly compound) response documents into record batches, using the
//! shared key map to move between remote and internal ids.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use tether_engine::{
    Normalizer, Operation, QueryExpr, Record, RecordBatch, RecordIdentity,
    RelationshipData, RelationshipObject, Resource, ResourceDocument, Schema, Serializer,
};
use tether_engine::{FieldFilter, FieldKind, FilterOp, KeyMap};

use crate::config::{ConfigError, RemoteConfig};
use crate::error::{Error, Result};
use crate::events::{BackgroundError, Notifier, SourceEvent};
use crate::source::Source;

pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// A request ready to be sent.
#[derive(Debug)]
struct Request {
    method: Method,
    segments: Vec<String>,
    params: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    /// Treat 404 as an empty result rather than an error
    not_found_is_empty: bool,
    /// Ignore any response body (relationship endpoints answer with linkage only)
    discard_body: bool,
}

impl Request {
    fn new(method: Method, segments: Vec<String>) -> Self {
        Self {
            method,
            segments,
            params: Vec::new(),
            body: None,
            not_found_is_empty: false,
            discard_body: false,
        }
    }

    fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// The remote source.
pub struct JsonApiSource {
    name: String,
    client: Client,
    base_url: Url,
    schema: Arc<Schema>,
    keymap: Arc<KeyMap>,
    notifier: Notifier,
}

impl JsonApiSource {
    pub fn new(
        name: impl Into<String>,
        config: &RemoteConfig,
        schema: Arc<Schema>,
        keymap: Arc<KeyMap>,
    ) -> Result<Self> {
        let client = Client::builder().build()?;
        Self::with_client(name, client, config, schema, keymap)
    }

    /// Use a preconfigured HTTP client (timeouts, proxies, auth headers).
    pub fn with_client(
        name: impl Into<String>,
        client: Client,
        config: &RemoteConfig,
        schema: Arc<Schema>,
        keymap: Arc<KeyMap>,
    ) -> Result<Self> {
        let base = config.base_url();
        let base_url = Url::parse(&base)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or(ConfigError::InvalidRemoteHost(base))?;

        let name = name.into();
        Ok(Self {
            notifier: Notifier::new(name.clone()),
            name,
            client,
            base_url,
            schema,
            keymap,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Receive errors raised by non-blocking listeners on this source.
    pub fn subscribe_errors(&self) -> tokio::sync::broadcast::Receiver<BackgroundError> {
        self.notifier.subscribe_errors()
    }

    fn serializer(&self) -> Serializer<'_> {
        Serializer::new(&self.schema, &self.keymap)
    }

    fn plural(&self, type_name: &str) -> Result<String> {
        Ok(self.schema.record_type(type_name)?.plural.clone())
    }

    /// `[plural, remoteId]` for an existing record.
    fn record_segments(&self, identity: &RecordIdentity) -> Result<Vec<String>> {
        Ok(vec![
            self.plural(&identity.type_name)?,
            self.serializer().require_remote_id(identity)?,
        ])
    }

    fn url(&self, segments: &[String]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidRemoteHost(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn query_request(&self, query: &QueryExpr) -> Result<Request> {
        Ok(match query {
            QueryExpr::FindRecord { record } => {
                let mut request = Request::new(Method::GET, self.record_segments(record)?);
                request.not_found_is_empty = true;
                request
            }
            QueryExpr::FindRecords {
                type_name,
                filter,
                sort,
                page,
            } => {
                let mut request = Request::new(Method::GET, vec![self.plural(type_name)?]);
                request.params.extend(filter.iter().map(filter_param));
                if !sort.is_empty() {
                    let sort: Vec<String> = sort.iter().map(|s| s.to_param()).collect();
                    request.params.push(("sort".into(), sort.join(",")));
                }
                if let Some(page) = page {
                    request
                        .params
                        .push(("page[offset]".into(), page.offset.to_string()));
                    if let Some(limit) = page.limit {
                        request.params.push(("page[limit]".into(), limit.to_string()));
                    }
                }
                request
            }
            QueryExpr::FindRelatedRecord {
                record,
                relationship,
            }
            | QueryExpr::FindRelatedRecords {
                record,
                relationship,
            } => {
                let mut segments = self.record_segments(record)?;
                segments.push(relationship.clone());
                Request::new(Method::GET, segments)
            }
        })
    }

    fn update_request(&self, operation: &Operation) -> Result<Request> {
        let serializer = self.serializer();

        Ok(match operation {
            Operation::AddRecord { record } => {
                let resource = serializer.record(record)?;
                Request::new(Method::POST, vec![self.plural(&record.type_name)?])
                    .body(document_body(resource)?)
            }
            Operation::UpdateRecord { record } => {
                let resource = serializer.record(record)?;
                let remote_id = resource.id.clone().ok_or_else(|| {
                    tether_engine::Error::MissingRemoteId(record.identity())
                })?;
                Request::new(Method::PATCH, vec![self.plural(&record.type_name)?, remote_id])
                    .body(document_body(resource)?)
            }
            Operation::RemoveRecord { record } => {
                Request::new(Method::DELETE, self.record_segments(record)?)
            }
            Operation::ReplaceAttribute {
                record,
                attribute,
                value,
            } => {
                let mut resource = Resource::new(
                    record.type_name.clone(),
                    Some(serializer.require_remote_id(record)?),
                );
                resource.attributes =
                    Some([(attribute.clone(), value.clone())].into_iter().collect());
                Request::new(Method::PATCH, self.record_segments(record)?)
                    .body(document_body(resource)?)
            }
            Operation::ReplaceRelatedRecord {
                record,
                relationship,
                related,
            } => {
                let mut resource = Resource::new(
                    record.type_name.clone(),
                    Some(serializer.require_remote_id(record)?),
                );
                let linkage = serializer.linkage(&RelationshipData::One(related.clone()))?;
                resource.relationships = Some(
                    [(relationship.clone(), RelationshipObject::with_data(linkage))]
                        .into_iter()
                        .collect(),
                );
                Request::new(Method::PATCH, self.record_segments(record)?)
                    .body(document_body(resource)?)
            }
            Operation::ReplaceRelatedRecords {
                record,
                relationship,
                related,
            }
            | Operation::AddToRelatedRecords {
                record,
                relationship,
                related,
            }
            | Operation::RemoveFromRelatedRecords {
                record,
                relationship,
                related,
            } => {
                let method = match operation {
                    Operation::ReplaceRelatedRecords { .. } => Method::PATCH,
                    Operation::AddToRelatedRecords { .. } => Method::POST,
                    _ => Method::DELETE,
                };
                let mut segments = self.record_segments(record)?;
                segments.push("relationships".into());
                segments.push(relationship.clone());

                let linkage = serializer.linkage(&RelationshipData::Many(related.clone()))?;
                let mut request =
                    Request::new(method, segments).body(serde_json::json!({ "data": linkage }));
                request.discard_body = true;
                request
            }
        })
    }

    /// Send a request. `None` means the server answered without a document.
    async fn send(&self, request: Request) -> Result<Option<ResourceDocument>> {
        let url = self.url(&request.segments)?;
        tracing::debug!(
            source = %self.name,
            method = %request.method,
            url = %url,
            "Sending request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(ACCEPT, JSONAPI_MEDIA_TYPE);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| Error::Decode(e.to_string()))?;
            builder = builder.header(CONTENT_TYPE, JSONAPI_MEDIA_TYPE).body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status();
        tracing::debug!(source = %self.name, status = status.as_u16(), "Received response");

        if status == StatusCode::NOT_FOUND && request.not_found_is_empty {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote {
                status: Some(status.as_u16()),
                message: if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }
        if status == StatusCode::NO_CONTENT || request.discard_body {
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        ResourceDocument::from_slice(&bytes)
            .map(Some)
            .map_err(Error::decode)
    }

    fn normalize(&self, document: &ResourceDocument) -> Result<RecordBatch> {
        let normalized = Normalizer::new(&self.schema, &self.keymap)
            .document(document)
            .map_err(Error::decode)?;
        if !normalized.skipped.is_empty() {
            tracing::debug!(
                source = %self.name,
                skipped = ?normalized.skipped,
                "Skipped fields not declared in the schema"
            );
        }
        Ok(normalized.batch)
    }

    /// Add the owner of a related-records query, with the relationship set
    /// to exactly what the server returned.
    fn with_owner(
        &self,
        mut batch: RecordBatch,
        owner: &RecordIdentity,
        relationship: &str,
    ) -> Result<RecordBatch> {
        let record_type = self.schema.record_type(&owner.type_name)?;
        let field = record_type
            .relationship(relationship)
            .ok_or_else(|| tether_engine::Error::UnknownField {
                type_name: owner.type_name.clone(),
                field: relationship.to_string(),
            })?;

        let mut partial = Record::new(owner.type_name.clone(), owner.id.clone());
        if let Some(key) = record_type.key_field() {
            if let Some(remote_id) = self.keymap.remote_id(&owner.type_name, &owner.id) {
                partial = partial.with_key(key, remote_id);
            }
        }
        partial = match field.kind {
            FieldKind::HasMany { .. } => partial.with_has_many(relationship, batch.primary.clone()),
            _ => partial.with_has_one(relationship, batch.primary.first().cloned()),
        };

        batch.records.push(Arc::new(partial));
        Ok(batch)
    }

    async fn fetch(&self, query: &QueryExpr) -> Result<RecordBatch> {
        // A record the server has never named cannot be on the server
        if let QueryExpr::FindRecord { record } = query {
            if self.serializer().remote_id(record)?.is_none() {
                tracing::debug!(
                    source = %self.name,
                    type_name = %record.type_name,
                    id = %record.id,
                    "No remote id known, skipping fetch"
                );
                return Ok(RecordBatch::new());
            }
        }

        let request = self.query_request(query)?;
        let batch = match self.send(request).await? {
            Some(document) => self.normalize(&document)?,
            None => RecordBatch::new(),
        };

        match query {
            QueryExpr::FindRelatedRecord {
                record,
                relationship,
            }
            | QueryExpr::FindRelatedRecords {
                record,
                relationship,
            } => self.with_owner(batch, record, relationship),
            _ => Ok(batch),
        }
    }

    /// Bind the key a record carries to its internal id, so the server's
    /// answer normalizes onto the same record.
    fn bind_key(&self, operation: &Operation) -> Result<()> {
        let (Operation::AddRecord { record } | Operation::UpdateRecord { record }) = operation
        else {
            return Ok(());
        };
        let Some(key) = self.schema.record_type(&record.type_name)?.key_field() else {
            return Ok(());
        };
        if let Some(remote_id) = record.key(key) {
            self.keymap.bind(&record.type_name, remote_id, &record.id)?;
        }
        Ok(())
    }

    async fn push(&self, operation: &Operation) -> Result<RecordBatch> {
        self.bind_key(operation)?;
        let request = self.update_request(operation)?;
        let Some(document) = self.send(request).await? else {
            return Ok(RecordBatch::new());
        };

        if let Operation::AddRecord { record } = operation {
            Normalizer::new(&self.schema, &self.keymap)
                .bind_primary(&document, &record.identity())
                .map_err(Error::decode)?;
        }
        self.normalize(&document)
    }
}

/// `filter[attr]=value`, or `filter[attr]=op:value` for comparisons.
fn filter_param(filter: &FieldFilter) -> (String, String) {
    let value = match &filter.value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let value = match filter.op {
        FilterOp::Equal => value,
        op => format!("{}:{}", op.as_str(), value),
    };
    (format!("filter[{}]", filter.attribute), value)
}

fn document_body(resource: Resource) -> Result<serde_json::Value> {
    serde_json::to_value(ResourceDocument::single(resource))
        .map_err(|e| Error::Decode(e.to_string()))
}

#[async_trait]
impl Source for JsonApiSource {
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

        let result = self.fetch(query).await?;
        tracing::debug!(source = %self.name, records = result.len(), "Query completed");

        self.notifier
            .emit(SourceEvent::AfterQuery(query.clone(), result.clone()))
            .await?;
        Ok(result)
    }

    async fn update(&self, operation: &Operation) -> Result<RecordBatch> {
        self.notifier
            .emit(SourceEvent::BeforeUpdate(operation.clone()))
            .await?;

        let result = self.push(operation).await?;
        tracing::debug!(
            source = %self.name,
            op = operation.name(),
            record = %operation.record(),
            records = result.len(),
            "Update completed"
        );

        self.notifier
            .emit(SourceEvent::AfterUpdate(operation.clone(), result.clone()))
            .await?;
        Ok(result)
    }

    async fn sync(&self, _batch: &RecordBatch) -> Result<()> {
        Err(Error::Unsupported(format!(
            "source '{}' cannot merge batches",
            self.name
        )))
    }
}

impl std::fmt::Debug for JsonApiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonApiSource")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}
