use clap::Parser;
use src2vec::core::config::{normalize_extension, CachePolicy, Config};
use src2vec::core::error::Result;
use src2vec::indexing::pipeline::{index_directory, IndexReport};
use src2vec::search::embedder::EmbeddingGenerator;
use src2vec::search::model::CandleLoader;
use src2vec::search::query::{SearchOptions, VectorSearch};
use src2vec::storage::cache::ContentCache;
use src2vec::storage::state::StateStore;
use src2vec::storage::vectors::{RecordFilter, VectorIndex, VectorStore};
use src2vec::ui::cli::{Cli, Commands};
use std::path::Path;
use std::process::ExitCode;
use tracing::warn;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "src2vec=debug,info" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let base = Config {
        cache_path: cli.cache_db,
        store_dir: cli.chroma_db,
        ..Config::default()
    };

    match cli.command {
        Commands::Index {
            path,
            model,
            chunk_size,
            chunk_overlap,
            extensions,
            ignore,
            batch_size,
            force,
            bypass_broken_cache,
        } => {
            let mut config = base;
            if let Some(model) = model {
                config.model_id = model;
            }
            if let Some(extensions) = extensions {
                config.extensions = extensions;
            }
            if let Some(ignore) = ignore {
                config.ignored_folders = ignore;
            }
            config.chunk_size = chunk_size;
            config.chunk_overlap = chunk_overlap;
            config.batch_size = batch_size;
            if bypass_broken_cache {
                config.cache_policy = CachePolicy::Bypass;
            }
            handle_index(&path, config.validate()?, force)
        }
        Commands::Search {
            query,
            results,
            threshold,
            file_type,
            model,
        } => handle_search(base.validate()?, &query, results, threshold, &file_type, model),
        Commands::Stats => handle_stats(base.validate()?),
        Commands::Show { path } => handle_show(base.validate()?, &path),
        Commands::Reset { cache } => handle_reset(base.validate()?, cache),
    }
}

fn handle_index(path: &Path, config: Config, force: bool) -> Result<()> {
    println!("Indexing {}", path.display());
    println!("  Model: {}", config.model_id);
    println!("  Extensions: {}", config.extensions.join(" "));

    let report = index_directory(path, &config, force)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &IndexReport) {
    println!("\nIndexing complete!");
    println!("  Files scanned: {}", report.files_scanned);
    println!("  Files indexed: {}", report.files_indexed);
    if report.files_skipped > 0 {
        println!("  Skipped (unchanged): {}", report.files_skipped);
    }
    if report.files_removed > 0 {
        println!("  Removed (deleted): {}", report.files_removed);
    }
    println!("  Chunks created: {}", report.chunks_created);
    println!("  Chunks from cache: {}", report.chunks_from_cache);
    if report.chunks_removed > 0 {
        println!("  Stale chunks removed: {}", report.chunks_removed);
    }
    println!("  Time: {:.1}s", report.duration_ms as f64 / 1000.0);
    if !report.errors.is_empty() {
        println!("  Errors: {}", report.errors.len());
        for error in &report.errors {
            println!("    ✗ {}: {}", error.path, error.message);
        }
    }
}

fn handle_search(
    mut config: Config,
    queries: &[String],
    limit: usize,
    threshold: f32,
    file_types: &[String],
    requested_model: Option<String>,
) -> Result<()> {
    let store = match VectorStore::open_existing(&config)? {
        Some(store) if store.count()? > 0 => store,
        _ => {
            println!("The index is empty. Run `src2vec index <path>` first.");
            return Ok(());
        }
    };

    let recorded = StateStore::open(&config)?.get_model_id()?;
    config.model_id = match (recorded, requested_model) {
        (Some(recorded), Some(requested)) if recorded != requested => {
            warn!(
                recorded = %recorded,
                requested = %requested,
                "index was built with another model; searching with the recorded one"
            );
            recorded
        }
        (Some(recorded), _) => recorded,
        (None, Some(requested)) => requested,
        (None, None) => config.model_id,
    };

    // Query embeddings never touch the content cache.
    let mut generator = EmbeddingGenerator::new(&config, Box::new(CandleLoader), None);
    let options = SearchOptions {
        top_k: limit,
        similarity_threshold: threshold,
        filter: RecordFilter {
            file_types: file_types.iter().map(|t| normalize_extension(t)).collect(),
            path_prefix: None,
        },
    };

    let queries: Vec<&str> = queries.iter().map(String::as_str).collect();
    let results = VectorSearch::new(&mut generator, &store).search(&queries, &options)?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results:", results.len());
    for (i, result) in results.iter().enumerate() {
        println!("\n{}. {} (similarity: {:.3})", i + 1, result.file_path, result.score);
        println!("   Lines: {}-{}", result.start_line, result.end_line);
        if queries.len() > 1 {
            println!("   Query: {}", result.query);
        }
        // Show preview of text (first 150 chars)
        let preview: String = result.text.chars().take(150).collect();
        println!("   Preview: {}...", preview.replace('\n', " "));
    }

    Ok(())
}

fn handle_stats(config: Config) -> Result<()> {
    let Some(store) = VectorStore::open_existing(&config)? else {
        println!("The index is empty. Run `src2vec index <path>` first.");
        return Ok(());
    };
    let stats = store.stats()?;
    let model = StateStore::open(&config)?.get_model_id()?;
    let cache_entries = if config.cache_path.exists() {
        ContentCache::open(&config.cache_path)?.len()?
    } else {
        0
    };

    println!("Vector store: {}", config.store_dir.display());
    println!("  Records: {}", stats.records);
    println!("  Files: {}", stats.files);
    println!("  Model: {}", model.as_deref().unwrap_or("(none)"));
    for (file_type, count) in &stats.by_file_type {
        let label = if file_type.is_empty() { "(none)" } else { file_type.as_str() };
        println!("    {}: {}", label, count);
    }
    println!("Embedding cache: {}", config.cache_path.display());
    println!("  Entries: {}", cache_entries);

    Ok(())
}

fn handle_show(config: Config, path: &str) -> Result<()> {
    let records = match VectorStore::open_existing(&config)? {
        Some(store) => store.file_records(path)?,
        None => Vec::new(),
    };
    if records.is_empty() {
        println!("{} is not indexed.", path);
        return Ok(());
    }

    println!("{} ({} chunks)", path, records.len());
    for record in &records {
        println!(
            "\n[{}] chars {}-{}, lines {}-{}",
            record.chunk_index, record.start, record.end, record.start_line, record.end_line
        );
        println!("{}", record.text);
    }
    Ok(())
}

fn handle_reset(config: Config, clear_cache: bool) -> Result<()> {
    VectorStore::open(&config)?.clear()?;
    StateStore::open(&config)?.clear()?;
    println!("Cleared vector store: {}", config.store_dir.display());

    if clear_cache {
        ContentCache::open(&config.cache_path)?.clear()?;
        println!("Cleared embedding cache: {}", config.cache_path.display());
    }
    Ok(())
}
