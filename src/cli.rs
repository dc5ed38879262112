use std::{path::PathBuf, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use litvec::{
    Backend, EmbeddingConfig, Mode, SearchType, StoreSettings,
    embedding::DEFAULT_EMBEDDING_TIMEOUT, settings,
};

#[derive(Debug, Parser)]
#[command(
    name = "litvec",
    about = "Vector storage and similarity search for literature collections"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true, env = "LITVEC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Store connection string (memory://, redb://<path>, or a file path)
    #[arg(long, global = true, env = settings::STORE_URL_ENV)]
    pub store: Option<String>,

    /// Schema to use instead of the mode's default
    #[arg(long, global = true, env = settings::SCHEMA_ENV)]
    pub schema: Option<String>,

    /// Deployment mode: production or test
    #[arg(
        long,
        global = true,
        env = settings::MODE_ENV,
        default_value = "test"
    )]
    pub mode: String,

    /// Seconds before a store round trip is abandoned
    #[arg(
        long,
        global = true,
        env = settings::TIMEOUT_ENV,
        default_value = "10"
    )]
    pub timeout: u64,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn store_settings(&self) -> litvec::Result<StoreSettings> {
        let store_url = match &self.store {
            Some(url) => url.clone(),
            None => settings::default_store_url(self.data_dir.clone())?,
        };
        StoreSettings::new(
            store_url,
            self.mode.parse::<Mode>()?,
            self.schema.as_deref(),
            Duration::from_secs(self.timeout),
        )
    }
}

#[derive(Debug, clap::Args)]
pub struct EmbeddingArgs {
    /// Embedding backend: openai, azure, local, or hashing
    #[arg(long, global = true, env = "LITVEC_BACKEND", default_value = "local")]
    pub backend: String,

    /// Model, Azure deployment, or local model path
    #[arg(long, global = true, env = "LITVEC_MODEL")]
    pub model: Option<String>,

    /// Base URL of the embedding service
    #[arg(long, global = true, env = "LITVEC_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Azure OpenAI API version
    #[arg(long, global = true, env = "LITVEC_API_VERSION")]
    pub api_version: Option<String>,

    /// Requested embedding size
    #[arg(long, global = true)]
    pub dimensions: Option<usize>,

    /// Seconds before an embedding request is abandoned
    #[arg(long, global = true)]
    pub embedding_timeout: Option<u64>,
}

impl EmbeddingArgs {
    pub fn config(&self) -> litvec::Result<EmbeddingConfig> {
        let mut config = EmbeddingConfig::new(self.backend.parse::<Backend>()?);
        config.model = self.model.clone();
        config.endpoint = self.endpoint.clone();
        config.api_version = self.api_version.clone();
        config.dimensions = self.dimensions;
        config.timeout = self
            .embedding_timeout
            .map_or(DEFAULT_EMBEDDING_TIMEOUT, Duration::from_secs);
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage schemas
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
    /// Manage collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Embed and store documents from a JSON Lines file
    Add(AddArgs),
    /// Search a collection
    Search(SearchArgs),
    /// Delete records by id
    Delete(DeleteArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Schema subcommands --

#[derive(Debug, Subcommand)]
pub enum SchemaAction {
    /// Create the schema (test mode) or report it (production)
    Init,
    /// List schemas registered in the store
    List,
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// Create a collection, or attach to it if it exists
    Ensure {
        name: String,
        /// JSON object stored as collection metadata on creation
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Attach to an existing collection and print it
    Attach { name: String },
    /// Delete a collection and all its records
    Drop { name: String },
    /// List collections in the schema
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a collection with its record count
    Show {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Target collection (created if missing)
    pub collection: String,

    /// JSON Lines file of {"content": ..., "metadata": {...}, "id"?: ...}
    pub file: PathBuf,

    /// Documents per embedding batch
    #[arg(long, default_value_t = litvec::ingestion::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Do not draw a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Collection to search
    pub collection: String,

    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'k', long, default_value_t = litvec::search::DEFAULT_K)]
    pub k: usize,

    /// similarity, similarity_score_threshold, or mmr
    #[arg(
        short = 't',
        long,
        default_value = "similarity",
        value_parser = parse_search_type
    )]
    pub search_type: SearchType,

    /// Drop results scoring below this
    #[arg(long)]
    pub score_threshold: Option<f32>,

    /// MMR candidate pool size
    #[arg(long)]
    pub fetch_k: Option<usize>,

    /// MMR relevance/diversity trade-off in [0, 1]
    #[arg(long)]
    pub lambda_mult: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_search_type(raw: &str) -> Result<SearchType, String> {
    raw.parse().map_err(|e: litvec::Error| e.to_string())
}

// -- Delete --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Collection holding the records
    pub collection: String,

    /// Record ids
    #[arg(required = true)]
    pub ids: Vec<String>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "litvec",
            &mut std::io::stdout(),
        );
    }
}
