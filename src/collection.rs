use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};

use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
    records::{self, Metadata, VectorRecord, record_key},
    schema::Schema,
    store::Store,
};

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 255;

/// A named partition of vector records inside one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Internal identity. Records point at this, not at the name, so a
    /// dropped and re-created collection never sees the old records.
    pub uuid: String,
    pub name: String,
    pub embedding_model: String,
    /// Set by the first ingestion (or up front when the provider knows its
    /// size); never changes once records exist.
    pub dimension: Option<usize>,
    pub metadata: Metadata,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// How [`CollectionManager::ensure`] obtained its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Attached,
}

/// A collection bound to the schema it lives in.
///
/// Handles are plain data: they can be cloned and passed to ingestors and
/// retrievers, which re-check the collection still exists on every call.
#[derive(Debug, Clone)]
pub struct CollectionHandle {
    schema: Schema,
    collection: Collection,
    outcome: EnsureOutcome,
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.collection.name
    }

    pub fn uuid(&self) -> &str {
        &self.collection.uuid
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn embedding_model(&self) -> &str {
        &self.collection.embedding_model
    }

    pub fn metadata(&self) -> &Metadata {
        &self.collection.metadata
    }

    pub fn outcome(&self) -> EnsureOutcome {
        self.outcome
    }

    pub fn was_created(&self) -> bool {
        self.outcome == EnsureOutcome::Created
    }
}

/// Name used for the collection holding an investigation's abstracts.
pub fn research_collection_name(research_id: &str) -> String {
    format!("research_{research_id}")
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len < MIN_NAME_LEN || len > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "collection name must be {MIN_NAME_LEN}-{MAX_NAME_LEN} \
             characters, got '{name}'"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::Validation(
            "collection name contains control characters".into(),
        ));
    }
    Ok(())
}

pub(crate) fn read_collection<T>(
    table: &T,
    name: &str,
) -> Result<Option<Collection>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(name)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn encode_collection(collection: &Collection) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(collection)?)
}

/// Read the live row behind `handle`, failing with `NotFound` when the
/// collection was dropped (or dropped and re-created under the same name).
pub(crate) fn live_collection<T>(
    table: &T,
    handle: &CollectionHandle,
) -> Result<Collection>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match read_collection(table, handle.name())? {
        Some(row) if row.uuid == handle.uuid() => Ok(row),
        _ => Err(Error::NotFound {
            kind: "collection",
            name: handle.name().to_string(),
        }),
    }
}

/// Creates, attaches to, and deletes collections in one schema.
pub struct CollectionManager<'a> {
    store: &'a Store,
    schema: Schema,
    provider: Option<&'a dyn EmbeddingProvider>,
}

impl<'a> CollectionManager<'a> {
    pub fn new(
        store: &'a Store,
        schema: Schema,
        provider: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            store,
            schema,
            provider: Some(provider),
        }
    }

    /// A manager for existing collections only. Attaching, listing and
    /// deleting work as usual; creating a collection is a config error,
    /// since the new row must record an embedding model.
    pub fn without_provider(store: &'a Store, schema: Schema) -> Self {
        Self {
            store,
            schema,
            provider: None,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create the schema namespace outside production; in production only
    /// log which one is in use.
    pub fn ensure_schema(&self, production: bool) -> Result<()> {
        self.schema.ensure(self.store, production)
    }

    /// Attach to `name`, creating it first if it does not exist.
    ///
    /// `metadata` is only used on creation. Calling this concurrently for
    /// the same name from several places converges on one collection: the
    /// losing creator attaches to the winner's row.
    pub fn ensure(
        &self,
        name: &str,
        metadata: Metadata,
    ) -> Result<CollectionHandle> {
        validate_name(name)?;

        if let Some(existing) = self.probe(name)? {
            return Ok(self.attached(existing));
        }

        match self.create(name, metadata) {
            Ok(created) => {
                tracing::info!(
                    collection = name,
                    schema = self.schema.name(),
                    model = %created.embedding_model,
                    "created collection"
                );
                Ok(self.handle(created, EnsureOutcome::Created))
            }
            Err(Error::AlreadyExists { .. }) => {
                tracing::debug!(
                    collection = name,
                    "lost creation race, attaching"
                );
                let existing = self.probe(name)?.ok_or_else(|| Error::NotFound {
                    kind: "collection",
                    name: name.to_string(),
                })?;
                Ok(self.attached(existing))
            }
            Err(e) => Err(e),
        }
    }

    /// Attach to an existing collection.
    pub fn attach(&self, name: &str) -> Result<CollectionHandle> {
        let existing = self.probe(name)?.ok_or_else(|| Error::NotFound {
            kind: "collection",
            name: name.to_string(),
        })?;
        Ok(self.attached(existing))
    }

    /// Look up a collection row by name.
    pub fn probe(&self, name: &str) -> Result<Option<Collection>> {
        let schema = self.schema.clone();
        let name = name.to_string();
        self.store.acquire()?.read("probe collection", move |txn| {
            let table = txn.open_table(schema.collections())?;
            read_collection(&table, &name)
        })
    }

    /// Insert a new collection row; `AlreadyExists` if the name is taken.
    fn create(&self, name: &str, mut metadata: Metadata) -> Result<Collection> {
        let provider = self.provider.ok_or_else(|| {
            Error::Config(format!(
                "creating collection '{name}' needs an embedding provider"
            ))
        })?;
        let created_at = Utc::now();
        let embedding_model = provider.model_tag().to_string();
        metadata.insert(
            "creation_date".into(),
            created_at.format("%Y-%m-%d %H:%M:%S").to_string().into(),
        );
        metadata.insert(
            "embedding_model".into(),
            embedding_model.clone().into(),
        );

        let collection = Collection {
            uuid: crate::ids::fresh_id(),
            name: name.to_string(),
            embedding_model,
            dimension: provider.dimension(),
            metadata,
            created_at,
        };

        let schema = self.schema.clone();
        self.store.acquire()?.write("create collection", move |txn| {
            let mut table = txn.open_table(schema.collections())?;
            if read_collection(&table, &collection.name)?.is_some() {
                return Err(Error::AlreadyExists {
                    kind: "collection",
                    name: collection.name.clone(),
                });
            }
            let bytes = encode_collection(&collection)?;
            table.insert(collection.name.as_str(), bytes.as_slice())?;
            drop(table);
            Ok(collection)
        })
    }

    fn attached(&self, existing: Collection) -> CollectionHandle {
        if let Some(provider) = self.provider
            && existing.embedding_model != provider.model_tag()
        {
            tracing::warn!(
                collection = %existing.name,
                stored = %existing.embedding_model,
                provider = provider.model_tag(),
                "collection was built with a different embedding model"
            );
        }
        tracing::info!(
            collection = %existing.name,
            schema = self.schema.name(),
            "attached to collection"
        );
        self.handle(existing, EnsureOutcome::Attached)
    }

    fn handle(
        &self,
        collection: Collection,
        outcome: EnsureOutcome,
    ) -> CollectionHandle {
        CollectionHandle {
            schema: self.schema.clone(),
            collection,
            outcome,
        }
    }

    /// All collections in the schema, ordered by name.
    pub fn list(&self) -> Result<Vec<Collection>> {
        let schema = self.schema.clone();
        self.store.acquire()?.read("list collections", move |txn| {
            let table = txn.open_table(schema.collections())?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (_, bytes) = entry?;
                result.push(serde_json::from_slice(bytes.value())?);
            }
            Ok(result)
        })
    }

    /// Number of records stored in the collection.
    pub fn count(&self, handle: &CollectionHandle) -> Result<usize> {
        let handle = handle.clone();
        self.store.acquire()?.read("count records", move |txn| {
            let collections = txn.open_table(handle.schema().collections())?;
            live_collection(&collections, &handle)?;
            let rows = txn.open_table(handle.schema().records())?;
            Ok(records::collection_keys(&rows, handle.uuid())?.len())
        })
    }

    /// Every record of the collection, in id order.
    pub fn documents(
        &self,
        handle: &CollectionHandle,
    ) -> Result<Vec<VectorRecord>> {
        let handle = handle.clone();
        self.store.acquire()?.read("load documents", move |txn| {
            let collections = txn.open_table(handle.schema().collections())?;
            live_collection(&collections, &handle)?;
            let rows = txn.open_table(handle.schema().records())?;
            let vectors = txn.open_table(handle.schema().vectors())?;
            records::scan_collection(&rows, &vectors, handle.uuid())
        })
    }

    /// The requested records in request order; unknown ids are skipped.
    pub fn get_by_ids(
        &self,
        handle: &CollectionHandle,
        ids: &[String],
    ) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Err(Error::Validation("no ids provided".into()));
        }
        let handle = handle.clone();
        let ids = ids.to_vec();
        self.store.acquire()?.read("load records by id", move |txn| {
            let collections = txn.open_table(handle.schema().collections())?;
            live_collection(&collections, &handle)?;
            let rows = txn.open_table(handle.schema().records())?;
            let vectors = txn.open_table(handle.schema().vectors())?;
            records::load_records(&rows, &vectors, handle.uuid(), &ids)
        })
    }

    /// Delete records by id.
    ///
    /// Either every id is deleted or none is: if any id is not stored in
    /// the collection the call fails with `NotFound` listing them.
    pub fn delete_by_ids(
        &self,
        handle: &CollectionHandle,
        ids: &[String],
    ) -> Result<usize> {
        if ids.is_empty() {
            return Err(Error::Validation("no ids provided".into()));
        }
        let unique: BTreeSet<String> = ids.iter().cloned().collect();

        let owned = handle.clone();
        let deleted = self.store.acquire()?.write("delete records", move |txn| {
            let collections = txn.open_table(owned.schema().collections())?;
            live_collection(&collections, &owned)?;
            drop(collections);

            let mut rows = txn.open_table(owned.schema().records())?;
            let mut vectors = txn.open_table(owned.schema().vectors())?;

            let mut missing = Vec::new();
            for id in &unique {
                let key = record_key(owned.uuid(), id);
                if rows.remove(key.as_str())?.is_none() {
                    missing.push(id.as_str());
                }
                vectors.remove(key.as_str())?;
            }
            if !missing.is_empty() {
                // returning an error aborts the transaction
                return Err(Error::NotFound {
                    kind: "record",
                    name: missing.join(", "),
                });
            }
            Ok(unique.len())
        })?;

        tracing::info!(collection = handle.name(), deleted, "deleted records");
        Ok(deleted)
    }

    /// Delete the collection and all of its records. Irreversible.
    pub fn drop_collection(&self, handle: &CollectionHandle) -> Result<usize> {
        let owned = handle.clone();
        let conn = self.store.acquire()?;
        let removed = conn.write("drop collection", move |txn| {
            let mut collections =
                txn.open_table(owned.schema().collections())?;
            live_collection(&collections, &owned)?;
            collections.remove(owned.name())?;
            drop(collections);

            let mut rows = txn.open_table(owned.schema().records())?;
            let mut vectors = txn.open_table(owned.schema().vectors())?;
            let keys = records::collection_keys(&rows, owned.uuid())?;
            for key in &keys {
                rows.remove(key.as_str())?;
                vectors.remove(key.as_str())?;
            }
            Ok(keys.len())
        })?;

        tracing::info!(
            collection = handle.name(),
            schema = handle.schema().name(),
            records = removed,
            "dropped collection"
        );
        Ok(removed)
    }
}
