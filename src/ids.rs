use std::collections::HashSet;

use redb::ReadableTable;
use uuid::Uuid;

use crate::{
    collection::CollectionHandle,
    error::{Error, Result},
    records::record_key,
    store::Store,
};

/// Attempts before giving up on finding an unused identifier.
const MAX_ATTEMPTS: usize = 16;

/// Generate a fresh random record identifier (UUIDv4, hyphenated).
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Hands out record ids that are unused in one collection.
///
/// Each call draws a random v4 UUID and checks the store once. This is
/// check-then-use: two allocators racing on the same collection are not
/// serialised against each other. With 122 random bits a clash is not a
/// practical concern, but callers needing exactly-once allocation must not
/// rely on this.
pub struct IdentifierAllocator<'a> {
    store: &'a Store,
    collection: &'a CollectionHandle,
}

impl<'a> IdentifierAllocator<'a> {
    pub fn new(store: &'a Store, collection: &'a CollectionHandle) -> Self {
        Self { store, collection }
    }

    /// Return an id that is neither in `excluding` nor already stored in
    /// the collection.
    pub fn allocate(&self, excluding: &HashSet<String>) -> Result<String> {
        for _ in 0..MAX_ATTEMPTS {
            let candidate = fresh_id();
            if excluding.contains(&candidate) {
                tracing::debug!(id = %candidate, "id collided with batch");
                continue;
            }
            if !self.exists(&candidate)? {
                return Ok(candidate);
            }
            tracing::debug!(id = %candidate, "id collided with store");
        }

        Err(Error::Store(format!(
            "no unused identifier for collection '{}' after \
             {MAX_ATTEMPTS} attempts",
            self.collection.name()
        )))
    }

    /// Allocate `count` pairwise-distinct ids.
    pub fn allocate_many(&self, count: usize) -> Result<Vec<String>> {
        let mut taken = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.allocate(&taken)?;
            taken.insert(id.clone());
            ids.push(id);
        }
        Ok(ids)
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let schema = self.collection.schema().clone();
        let key = record_key(self.collection.uuid(), id);
        self.store.acquire()?.read("id existence check", move |txn| {
            let records = txn.open_table(schema.records())?;
            Ok(records.get(key.as_str())?.is_some())
        })
    }
}
