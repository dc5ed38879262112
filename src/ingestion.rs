use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    collection::{CollectionHandle, encode_collection, live_collection},
    embedding::{EmbeddingProvider, check_batch},
    error::{Error, Result},
    ids::IdentifierAllocator,
    records::{Metadata, VectorRecord, encode_row, encode_vector, record_key},
    store::Store,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// A piece of text to embed and store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// A document for one article: title and abstract as content, with the
    /// article id kept in metadata so search hits point back at it.
    pub fn article(
        id: impl Into<String>,
        title: &str,
        abstract_text: &str,
    ) -> Self {
        let id: String = id.into();
        let mut metadata = Metadata::new();
        metadata.insert("id".into(), id.into());
        Self {
            content: format!("{title} \n{abstract_text}"),
            metadata,
        }
    }
}

/// A batch that could not be stored.
#[derive(Debug)]
pub struct BatchFailure {
    /// Zero-based batch number.
    pub index: usize,
    /// Ids of the documents in the batch; none of them were written.
    pub ids: Vec<String>,
    pub error: Error,
}

/// Outcome of one [`BatchIngestor::add`] call.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Every id assigned to an input document, in input order.
    pub ids: Vec<String>,
    /// Sizes of the batches that were written, in order.
    pub batch_sizes: Vec<usize>,
    pub failures: Vec<BatchFailure>,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.batch_sizes.iter().sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Passed to the progress callback after each batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub index: usize,
    pub total: usize,
    pub size: usize,
    pub stored: bool,
}

/// Embeds documents and writes them to a collection in fixed-size batches.
pub struct BatchIngestor<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    batch_size: usize,
}

impl<'a> BatchIngestor<'a> {
    pub fn new(store: &'a Store, provider: &'a dyn EmbeddingProvider) -> Self {
        Self {
            store,
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Validation("batch size must be positive".into()));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Store `documents` in the collection.
    ///
    /// Documents without a caller id get a freshly allocated one. An id that
    /// is already stored is overwritten. Batches are independent: a failed
    /// batch is recorded in the report and the next one is still attempted,
    /// so a partial ingestion returns `Ok` with failures listed.
    pub fn add(
        &self,
        collection: &CollectionHandle,
        documents: &[Document],
        ids: Option<Vec<String>>,
    ) -> Result<IngestReport> {
        self.add_with_progress(collection, documents, ids, |_| {})
    }

    pub fn add_with_progress<F>(
        &self,
        collection: &CollectionHandle,
        documents: &[Document],
        ids: Option<Vec<String>>,
        mut on_batch: F,
    ) -> Result<IngestReport>
    where
        F: FnMut(&BatchProgress),
    {
        validate(documents, ids.as_deref())?;

        let ids = match ids {
            Some(ids) => ids,
            None => IdentifierAllocator::new(self.store, collection)
                .allocate_many(documents.len())?,
        };

        let total = documents.len().div_ceil(self.batch_size);
        let mut report = IngestReport {
            ids: ids.clone(),
            ..IngestReport::default()
        };

        for (index, (docs, ids)) in documents
            .chunks(self.batch_size)
            .zip(ids.chunks(self.batch_size))
            .enumerate()
        {
            let stored = match self.store_batch(collection, docs, ids) {
                Ok(()) => {
                    tracing::info!(
                        collection = collection.name(),
                        batch = index + 1,
                        of = total,
                        size = docs.len(),
                        "stored batch"
                    );
                    report.batch_sizes.push(docs.len());
                    true
                }
                Err(error) => {
                    tracing::warn!(
                        collection = collection.name(),
                        batch = index + 1,
                        of = total,
                        error = %error,
                        "batch failed"
                    );
                    report.failures.push(BatchFailure {
                        index,
                        ids: ids.to_vec(),
                        error,
                    });
                    false
                }
            };
            on_batch(&BatchProgress {
                index,
                total,
                size: docs.len(),
                stored,
            });
        }

        Ok(report)
    }

    fn store_batch(
        &self,
        collection: &CollectionHandle,
        docs: &[Document],
        ids: &[String],
    ) -> Result<()> {
        let texts: Vec<String> =
            docs.iter().map(|d| d.content.clone()).collect();
        let vectors = self.provider.embed(&texts)?;
        check_batch("embedding", texts.len(), &vectors)?;
        let dimension = vectors.first().map_or(0, Vec::len);

        let mut rows = Vec::with_capacity(docs.len());
        for ((doc, id), vector) in docs.iter().zip(ids).zip(vectors) {
            let record = VectorRecord {
                id: id.clone(),
                vector,
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                collection_id: collection.uuid().to_string(),
            };
            rows.push((
                record_key(collection.uuid(), id),
                encode_row(&record)?,
                encode_vector(&record.vector),
            ));
        }

        let handle = collection.clone();
        self.store.acquire()?.write("store batch", move |txn| {
            {
                let mut collections =
                    txn.open_table(handle.schema().collections())?;
                let mut row = live_collection(&collections, &handle)?;
                match row.dimension {
                    Some(expected) if expected != dimension => {
                        return Err(Error::DimensionMismatch {
                            expected,
                            actual: dimension,
                        });
                    }
                    Some(_) => {}
                    None => {
                        row.dimension = Some(dimension);
                        let bytes = encode_collection(&row)?;
                        collections
                            .insert(row.name.as_str(), bytes.as_slice())?;
                        tracing::debug!(
                            collection = %row.name,
                            dimension,
                            "fixed collection dimension"
                        );
                    }
                }
            }

            let mut records = txn.open_table(handle.schema().records())?;
            let mut stored_vectors = txn.open_table(handle.schema().vectors())?;
            for (key, row, vector) in &rows {
                records.insert(key.as_str(), row.as_slice())?;
                stored_vectors.insert(key.as_str(), vector.as_slice())?;
            }
            Ok(())
        })
    }
}

fn validate(documents: &[Document], ids: Option<&[String]>) -> Result<()> {
    if documents.is_empty() {
        return Err(Error::Validation("no documents to add".into()));
    }
    if let Some(position) =
        documents.iter().position(|d| d.metadata.is_empty())
    {
        return Err(Error::Validation(format!(
            "document {position} has empty metadata"
        )));
    }

    let Some(ids) = ids else {
        return Ok(());
    };
    if ids.len() != documents.len() {
        return Err(Error::Validation(format!(
            "{} ids for {} documents",
            ids.len(),
            documents.len()
        )));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if id.is_empty() {
            return Err(Error::Validation("empty document id".into()));
        }
        if !seen.insert(id.as_str()) {
            return Err(Error::Validation(format!(
                "duplicate document id '{id}'"
            )));
        }
    }
    Ok(())
}
