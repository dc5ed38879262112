#![allow(dead_code)]

use litvec::{
    CollectionHandle,
    CollectionManager,
    Document,
    HashingEmbedder,
    Metadata,
    Schema,
    Store,
    store::DEFAULT_TIMEOUT,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const SCHEMA: &str = "test";

/// A fresh in-memory store with the test schema in place.
pub fn memory_store() -> litvec::Result<Store> {
    let store = Store::open("memory://", DEFAULT_TIMEOUT)?;
    Schema::new(SCHEMA)?.ensure(&store, false)?;
    Ok(store)
}

pub fn embedder() -> HashingEmbedder {
    HashingEmbedder::new(1024).expect("positive dimension")
}

pub fn manager<'a>(
    store: &'a Store,
    embedder: &'a HashingEmbedder,
) -> CollectionManager<'a> {
    let schema = Schema::new(SCHEMA).expect("valid schema");
    CollectionManager::new(store, schema, embedder)
}

pub fn collection(
    manager: &CollectionManager<'_>,
    name: &str,
) -> litvec::Result<CollectionHandle> {
    manager.ensure(name, Metadata::new())
}

/// `n` articles with distinct vocabularies.
pub fn articles(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            Document::article(
                format!("article-{i}"),
                &format!("topic{i} study"),
                &format!("findings{i} about subject{i}"),
            )
        })
        .collect()
}
