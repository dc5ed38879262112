//! litvec - collection-scoped vector storage and similarity retrieval for
//! literature abstracts.
//!
//! Documents are embedded through a pluggable [`EmbeddingProvider`]
//! (OpenAI, Azure OpenAI, a local ColBERT model, or an offline hashing
//! embedder), stored in a [redb](https://github.com/cberner/redb) file
//! partitioned into schemas and named collections, and retrieved by cosine
//! similarity, with optional score thresholds and maximal marginal
//! relevance.
//!
//! # Quick start
//!
//! ```no_run
//! use litvec::{
//!     BatchIngestor, CollectionManager, Document, HashingEmbedder, Metadata,
//!     Schema, SearchPolicy, SimilarityRetriever, Store,
//! };
//! use litvec::collection::research_collection_name;
//!
//! let store =
//!     Store::open("memory://", litvec::store::DEFAULT_TIMEOUT).unwrap();
//! let embedder = HashingEmbedder::new(256).unwrap();
//!
//! let schema = Schema::new("test").unwrap();
//! let manager = CollectionManager::new(&store, schema, &embedder);
//! manager.ensure_schema(false).unwrap();
//! let collection = manager
//!     .ensure(&research_collection_name("42"), Metadata::new())
//!     .unwrap();
//!
//! let docs = vec![Document::article(
//!     "7",
//!     "Malaria vaccines",
//!     "A phase III trial.",
//! )];
//! BatchIngestor::new(&store, &embedder)
//!     .add(&collection, &docs, None)
//!     .unwrap();
//!
//! let policy = SearchPolicy::default();
//! let retriever =
//!     SimilarityRetriever::new(&store, &embedder, collection, policy)
//!         .unwrap();
//! for hit in retriever.search("malaria vaccine").unwrap() {
//!     println!("{} {:.3} {}", hit.id, hit.score, hit.metadata["id"]);
//! }
//! ```

pub mod collection;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod hosted;
pub mod ids;
pub mod ingestion;
pub mod model_manager;
pub mod records;
pub mod schema;
pub mod search;
pub mod settings;
pub mod similarity;
pub mod store;
pub mod text_util;

pub use collection::{
    Collection,
    CollectionHandle,
    CollectionManager,
    EnsureOutcome,
};
pub use data_dir::DataDir;
pub use embedding::{
    Backend,
    EmbeddingConfig,
    EmbeddingProvider,
    build_provider,
};
pub use error::{Error, ErrorKind, Result};
pub use hashing::HashingEmbedder;
pub use hosted::HostedEmbedder;
pub use ids::IdentifierAllocator;
pub use ingestion::{BatchIngestor, Document, IngestReport};
pub use model_manager::ModelManager;
pub use records::{Metadata, VectorRecord};
pub use schema::Schema;
pub use search::{
    ScoreKwargs,
    ScoredRecord,
    SearchPolicy,
    SearchType,
    SimilarityRetriever,
};
pub use settings::{Mode, StoreSettings};
pub use store::{Connection, Store};
