use std::{
    io::{BufRead, BufReader},
    path::Path,
};

use clap::Parser;
use kdam::{BarExt, tqdm};
use litvec::{
    BatchIngestor,
    CollectionHandle,
    CollectionManager,
    Document,
    EmbeddingProvider,
    Error,
    Metadata,
    Result,
    ScoreKwargs,
    SearchPolicy,
    SimilarityRetriever,
    Store,
    StoreSettings,
    build_provider,
    schema,
    text_util,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AddArgs, Cli, CollectionAction, Command, SchemaAction, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("LITVEC_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let settings = cli.store_settings()?;
    let store = settings.open_store()?;

    let result = run(&cli, &settings, &store);
    tracing::debug!(round_trips = store.round_trips(), "store traffic");
    store.close();
    result
}

fn run(cli: &Cli, settings: &StoreSettings, store: &Store) -> Result<()> {
    let namespace = settings.schema.clone();
    // Only commands that embed text or create collections load a backend.
    let provider = || build_provider(&cli.embedding.config()?);
    let bare = || CollectionManager::without_provider(store, namespace.clone());

    match &cli.command {
        Command::Schema { action } => match action {
            SchemaAction::Init => {
                namespace.ensure(store, settings.mode.is_production())?;
                println!(
                    "Schema '{}' ready ({})",
                    namespace.name(),
                    settings.mode
                );
            }
            SchemaAction::List => {
                for name in schema::list_schemas(store)? {
                    println!("{name}");
                }
            }
        },
        Command::Collection { action } => match action {
            CollectionAction::Ensure { name, metadata } => {
                let metadata = parse_metadata(metadata.as_deref())?;
                let provider = provider()?;
                let manager = CollectionManager::new(
                    store,
                    namespace.clone(),
                    provider.as_ref(),
                );
                let handle = manager.ensure(name, metadata)?;
                let verb = if handle.was_created() {
                    "Created"
                } else {
                    "Attached to"
                };
                println!(
                    "{verb} collection '{}' ({})",
                    handle.name(),
                    handle.uuid()
                );
            }
            CollectionAction::Attach { name } => {
                let manager = bare();
                let handle = manager.attach(name)?;
                print_collection(&manager, &handle, false)?;
            }
            CollectionAction::Drop { name } => {
                let manager = bare();
                let handle = manager.attach(name)?;
                let removed = manager.drop_collection(&handle)?;
                println!("Dropped collection '{name}' ({removed} records)");
            }
            CollectionAction::List { json } => {
                collection_list(&bare(), *json)?;
            }
            CollectionAction::Show { name, json } => {
                let manager = bare();
                let handle = manager.attach(name)?;
                print_collection(&manager, &handle, *json)?;
            }
        },
        Command::Add(args) => {
            let provider = provider()?;
            let manager = CollectionManager::new(
                store,
                namespace.clone(),
                provider.as_ref(),
            );
            cmd_add(store, &manager, provider.as_ref(), args)?;
        }
        Command::Search(args) => {
            let provider = provider()?;
            let manager = CollectionManager::new(
                store,
                namespace.clone(),
                provider.as_ref(),
            );
            cmd_search(store, &manager, provider.as_ref(), args)?;
        }
        Command::Delete(args) => {
            let manager = bare();
            let handle = manager.attach(&args.collection)?;
            let deleted = manager.delete_by_ids(&handle, &args.ids)?;
            println!("Deleted {deleted} records from '{}'", args.collection);
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn parse_metadata(raw: Option<&str>) -> Result<Metadata> {
    match raw {
        None => Ok(Metadata::new()),
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::Validation(
                "metadata must be a JSON object".into(),
            )),
        },
    }
}

fn print_collection(
    manager: &CollectionManager<'_>,
    handle: &CollectionHandle,
    json: bool,
) -> Result<()> {
    let count = manager.count(handle)?;
    let collection = handle.collection();

    if json {
        let value = serde_json::json!({
            "collection": collection,
            "schema": handle.schema().name(),
            "records": count,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Name:       {}", collection.name);
    println!("UUID:       {}", collection.uuid);
    println!("Schema:     {}", handle.schema().name());
    println!("Model:      {}", collection.embedding_model);
    match collection.dimension {
        Some(d) => println!("Dimension:  {d}"),
        None => println!("Dimension:  (not set)"),
    }
    println!(
        "Created:    {}",
        collection.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("Records:    {count}");
    Ok(())
}

fn collection_list(manager: &CollectionManager<'_>, json: bool) -> Result<()> {
    let collections = manager.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&collections)?);
        return Ok(());
    }

    if collections.is_empty() {
        println!("No collections in schema '{}'", manager.schema().name());
        return Ok(());
    }
    for c in &collections {
        println!("{}\t{}\t{}", c.name, c.embedding_model, c.uuid);
    }
    Ok(())
}

/// One line of an `add` input file.
#[derive(Debug, Deserialize)]
struct JsonlDocument {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

fn read_jsonl(path: &Path) -> Result<(Vec<Document>, Option<Vec<String>>)> {
    let reader = BufReader::new(std::fs::File::open(path)?);

    let mut documents = Vec::new();
    let mut ids = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: JsonlDocument = serde_json::from_str(&line).map_err(|e| {
            Error::Validation(format!(
                "{}:{}: {e}",
                path.display(),
                line_no + 1
            ))
        })?;
        ids.push(parsed.id);
        documents.push(Document::new(parsed.content, parsed.metadata));
    }

    let with_id = ids.iter().filter(|id| id.is_some()).count();
    let ids = if with_id == 0 {
        None
    } else if with_id == ids.len() {
        Some(ids.into_iter().flatten().collect())
    } else {
        return Err(Error::Validation(format!(
            "{}: either every line or no line may carry an id",
            path.display()
        )));
    };
    Ok((documents, ids))
}

fn cmd_add(
    store: &Store,
    manager: &CollectionManager<'_>,
    provider: &dyn EmbeddingProvider,
    args: &AddArgs,
) -> Result<()> {
    let (documents, ids) = read_jsonl(&args.file)?;
    let handle = manager.ensure(&args.collection, Metadata::new())?;
    let ingestor =
        BatchIngestor::new(store, provider).with_batch_size(args.batch_size)?;

    let report = if args.no_progress {
        ingestor.add(&handle, &documents, ids)?
    } else {
        let mut pb =
            tqdm!(total = documents.len(), desc = "Embedding", unit = " docs");
        let report =
            ingestor.add_with_progress(&handle, &documents, ids, |progress| {
                if let Err(e) = pb.update(progress.size) {
                    tracing::debug!(error = %e, "progress bar update failed");
                }
            })?;
        eprintln!();
        report
    };

    println!(
        "Stored {} of {} documents in '{}'",
        report.stored(),
        documents.len(),
        handle.name()
    );
    for failure in &report.failures {
        eprintln!(
            "batch {} failed ({} documents): {}",
            failure.index + 1,
            failure.ids.len(),
            failure.error
        );
    }
    if !report.is_complete() {
        return Err(Error::Store(format!(
            "{} of {} batches failed",
            report.failures.len(),
            report.failures.len() + report.batch_sizes.len()
        )));
    }
    Ok(())
}

fn cmd_search(
    store: &Store,
    manager: &CollectionManager<'_>,
    provider: &dyn EmbeddingProvider,
    args: &SearchArgs,
) -> Result<()> {
    let handle = manager.attach(&args.collection)?;
    let policy = SearchPolicy::new(
        args.search_type,
        ScoreKwargs {
            k: Some(args.k),
            score_threshold: args.score_threshold,
            fetch_k: args.fetch_k,
            lambda_mult: args.lambda_mult,
        },
    )?;
    let retriever = SimilarityRetriever::new(store, provider, handle, policy)?;
    let results = retriever.search(&args.query)?;

    if args.json {
        let value = serde_json::json!({
            "query": args.query,
            "collection": args.collection,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, hit) in results.iter().enumerate() {
        println!(
            "{:>3}. {:.4}  {}  {}",
            rank + 1,
            hit.score,
            hit.id,
            text_util::snippet(
                &hit.content,
                text_util::DEFAULT_SNIPPET_MAX_CHARS
            )
        );
    }
    Ok(())
}
