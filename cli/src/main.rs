//! fraudgraph CLI: load payment tables into a graph store and run the
//! fraud-analysis queries against it.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use fraudgraph::{
    Config, FraudGraphError, GraphStore, HttpGraphStore, InputTables, LoadReport, Loader,
    MemoryGraphStore, QueryBatchReport, QueryEngine, QueryKind, QueryOptions, QueryOutput,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "fraudgraph", version, about = "Payment fraud graph loader and queries")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Graph store HTTP URL (overrides config and FRAUDGRAPH_URI)
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Database name
    #[arg(long, global = true)]
    database: Option<String>,

    /// Use an in-process graph; its contents are discarded on exit
    #[arg(long, global = true)]
    embedded: bool,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Window start (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Window end, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Maximum rows returned
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,

    /// Co-occurrence degree k; paths have 4k + 4 relationships
    #[arg(long, allow_negative_numbers = true)]
    k: Option<i64>,
}

impl QueryArgs {
    fn options(&self) -> QueryOptions {
        QueryOptions {
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.limit,
            degree: self.k,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load customers.csv, terminals.csv and transactions.csv from a directory
    Load {
        data_dir: PathBuf,

        /// Transaction rows per write transaction
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Chunks written concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Delete the whole graph first
        #[arg(long)]
        clear: bool,

        /// Skip entities and indexes and resume transactions at this chunk
        #[arg(long, conflicts_with = "clear")]
        resume_from: Option<usize>,

        /// Skip entities and indexes and resubmit only these chunks (e.g. 1,3)
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["clear", "resume_from"])]
        rerun_chunks: Vec<usize>,
    },
    /// Run one query (1-4 or its name), or all four
    Query {
        kind: Option<QueryKind>,

        #[command(flatten)]
        args: QueryArgs,
    },
    /// Delete every node and relationship
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
    /// Show node and relationship counts
    Status,
    /// Load a directory and run all queries in one session
    Pipeline {
        data_dir: PathBuf,

        #[command(flatten)]
        args: QueryArgs,
    },
}

#[tokio::main]
async fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// How `load` treats the transaction table
enum LoadMode<'a> {
    Full { clear: bool },
    ResumeFrom(usize),
    Rerun(&'a [usize]),
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli, |name| std::env::var(name).ok())?;

    let store = open_store(&cli, &config).await?;
    let result = match &cli.command {
        Commands::Load {
            data_dir,
            clear,
            resume_from,
            rerun_chunks,
            ..
        } => {
            let mode = match (resume_from, rerun_chunks.is_empty()) {
                (Some(first_chunk), _) => LoadMode::ResumeFrom(*first_chunk),
                (None, false) => LoadMode::Rerun(rerun_chunks),
                (None, true) => LoadMode::Full { clear: *clear },
            };
            run_load(store.clone(), &config, data_dir, mode, &cli.format).await
        }
        Commands::Query { kind, args } => {
            let engine = QueryEngine::new(store.clone(), config.queries);
            run_query(&engine, *kind, &args.options(), &cli.format).await
        }
        Commands::Clear { yes } => run_clear(store.clone(), &config, *yes).await,
        Commands::Status => run_status(store.clone(), &config, &cli.format).await,
        Commands::Pipeline { data_dir, args } => {
            run_load(store.clone(), &config, data_dir, LoadMode::Full { clear: true }, &cli.format)
                .await?;
            let engine = QueryEngine::new(store.clone(), config.queries);
            run_query(&engine, None, &args.options(), &cli.format).await
        }
    };
    store.close().await?;
    result
}

/// File (or defaults), then environment, then flags; validated once at the end
fn resolve_config<F>(cli: &Cli, env: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &cli.config {
        Some(path) => Config::read(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_overrides(env);
    if let Some(uri) = &cli.uri {
        config.store.uri = uri.clone();
    }
    if let Some(database) = &cli.database {
        config.store.database = database.clone();
    }
    if let Commands::Load {
        chunk_size,
        concurrency,
        ..
    } = &cli.command
    {
        if let Some(size) = chunk_size {
            config.loader.chunk_size = *size;
        }
        if let Some(n) = concurrency {
            config.loader.write_concurrency = *n;
        }
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn GraphStore>> {
    let store: Arc<dyn GraphStore> = if cli.embedded {
        Arc::new(MemoryGraphStore::new(config.store.database.clone()))
    } else {
        Arc::new(HttpGraphStore::from_config(&config.store)?)
    };
    store
        .verify_connectivity()
        .await
        .with_context(|| format!("connecting to {}", config.store.uri))?;
    Ok(store)
}

async fn run_load(
    store: Arc<dyn GraphStore>,
    config: &Config,
    data_dir: &Path,
    mode: LoadMode<'_>,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let tables = InputTables::read_dir(data_dir)
        .with_context(|| format!("reading tables from {}", data_dir.display()))?;
    let loader = Loader::new(store, config.loader);
    let chunk_size = config.loader.chunk_size()?;

    let result = match mode {
        LoadMode::Full { clear } => {
            if clear {
                let cleared = loader.clear().await?;
                info!(nodes = cleared.nodes_deleted, "cleared graph before load");
            }
            loader.load(&tables).await
        }
        LoadMode::ResumeFrom(first_chunk) => {
            loader
                .create_transactions_from(&tables.transactions, chunk_size, first_chunk)
                .await
        }
        LoadMode::Rerun(indices) => {
            loader
                .rerun_chunks(&tables.transactions, chunk_size, indices)
                .await
        }
    };

    match result {
        Ok(report) => {
            print_load_report(&report, format)?;
            Ok(())
        }
        Err(err) => {
            report_chunk_failures(&err);
            Err(err.into())
        }
    }
}

fn report_chunk_failures(err: &FraudGraphError) {
    for (index, start, end) in err.chunk_failures() {
        eprintln!("chunk {} (rows {}..{}) was rolled back", index, start, end);
    }
    if let Some(committed) = err.committed() {
        eprintln!(
            "{} chunk(s) committed before the failure, {} unmatched row(s) among them",
            committed.chunks_committed,
            committed.unmatched_rows()
        );
    }
    if let Some(hint) = recovery_hint(err) {
        eprintln!("{}", hint);
    }
}

/// Sequential failures resume at the failed chunk; concurrent failures
/// resubmit exactly the failed chunks, since later ones may have committed.
fn recovery_hint(err: &FraudGraphError) -> Option<String> {
    match err {
        FraudGraphError::ChunkWrite { index, .. } => Some(format!(
            "resume with: fraudgraph load <DIR> --resume-from {}",
            index
        )),
        FraudGraphError::ChunksFailed { .. } => {
            let indices: Vec<String> = err
                .chunk_failures()
                .iter()
                .map(|(index, _, _)| index.to_string())
                .collect();
            Some(format!(
                "rerun with: fraudgraph load <DIR> --rerun-chunks {}",
                indices.join(",")
            ))
        }
        _ => None,
    }
}

fn print_load_report(report: &LoadReport, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["", "count"]);
            table.add_row(vec!["customers created".to_string(), report.customers_created.to_string()]);
            table.add_row(vec!["terminals created".to_string(), report.terminals_created.to_string()]);
            table.add_row(vec!["chunks committed".to_string(), report.chunks_committed.to_string()]);
            table.add_row(vec!["rows attempted".to_string(), report.rows_attempted.to_string()]);
            table.add_row(vec!["rows matched".to_string(), report.rows_matched.to_string()]);
            table.add_row(vec!["transactions created".to_string(), report.transactions_created.to_string()]);
            table.add_row(vec!["rows unmatched".to_string(), report.unmatched_rows().to_string()]);
            println!("{}", table);
        }
    }
    Ok(())
}

async fn run_query(
    engine: &QueryEngine,
    kind: Option<QueryKind>,
    options: &QueryOptions,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match kind {
        Some(kind) => {
            let output = engine.run(kind, options).await?;
            print_output(&output, format)
        }
        None => {
            let report = engine.run_all(options).await;
            print_batch(&report, format)
        }
    }
}

fn print_output(output: &QueryOutput, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(output)?),
        OutputFormat::Table => {
            println!("Query {}: {}", output.kind().number(), output.kind());
            if output.is_empty() {
                println!("(no results)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(output.headers().to_vec());
            for row in output.display_rows() {
                table.add_row(row);
            }
            println!("{}", table);
            println!("{} row(s)", output.len());
        }
    }
    Ok(())
}

fn print_batch(report: &QueryBatchReport, format: &OutputFormat) -> anyhow::Result<()> {
    for entry in &report.entries {
        match &entry.result {
            Ok(output) => print_output(output, format)?,
            Err(err) => eprintln!("Query {} ({}) failed: {}", entry.kind.number(), entry.kind, err),
        }
        if matches!(format, OutputFormat::Table) {
            println!("elapsed: {:.3}s\n", entry.elapsed.as_secs_f64());
        }
    }
    if !report.all_succeeded() {
        bail!("{} query(ies) failed", report.failures().count());
    }
    Ok(())
}

async fn run_clear(store: Arc<dyn GraphStore>, config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!(
            "refusing to delete every node in database `{}` without --yes",
            config.store.database
        );
    }
    let report = Loader::new(store, config.loader).clear().await?;
    println!(
        "Deleted {} relationship(s) and {} node(s)",
        report.relationships_deleted, report.nodes_deleted
    );
    Ok(())
}

async fn run_status(
    store: Arc<dyn GraphStore>,
    config: &Config,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let counts = QueryEngine::new(store.clone(), config.queries)
        .graph_counts()
        .await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&counts)?),
        OutputFormat::Table => {
            println!("Database: {}", store.database());
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["kind", "name", "count"]);
            for (label, count) in &counts.nodes {
                table.add_row(vec!["node".to_string(), label.clone(), count.to_string()]);
            }
            for (edge_type, count) in &counts.relationships {
                table.add_row(vec!["relationship".to_string(), edge_type.clone(), count.to_string()]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}
