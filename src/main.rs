//! recon-ingest CLI entry point

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use recon_ingest::{
    commands::{cmd_ingest, print_ingest_stats, IngestOptions},
    config::Config,
    embed::EmbeddingStrategy,
    error::Result,
    normalize::{now_timestamp, NormalizeOptions, Tool},
    progress::LogWriterFactory,
    store::QdrantStore,
};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "recon-ingest")]
#[command(
    version,
    about = "Load recon tool output into Qdrant with hostname correlation",
    long_about = None
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output statistics as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest dnsx JSON output
    Dnsx(IngestArgs),

    /// Ingest nuclei JSON/JSONL findings
    Nuclei(IngestArgs),

    /// Ingest subdomain enumeration results (subfinder, sublist3r, amass)
    Subdomains(IngestArgs),

    /// Ingest parsed WHOIS records
    Whois(IngestArgs),

    /// Ingest sslscan results
    Sslscan(IngestArgs),

    /// Ingest arbitrary JSON records keyed by hostname
    Json(IngestArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// JSON, JSONL, or `{"results": [...]}` file to ingest
    input_file: PathBuf,

    /// Destination collection (defaults to the tool's collection)
    collection: Option<String>,

    /// Qdrant host
    #[arg(long)]
    host: Option<String>,

    /// Qdrant gRPC port [default: 6334]; the REST port 6333 is not used
    #[arg(long)]
    port: Option<u16>,

    /// Full Qdrant URL; overrides --host and --port
    #[arg(long)]
    url: Option<String>,

    /// Vector size of the destination collection
    #[arg(long)]
    vector_size: Option<usize>,

    /// Points per upsert call
    #[arg(long)]
    batch_size: Option<usize>,

    /// Do not correlate records against subdomain collections
    #[arg(long)]
    skip_correlation: bool,

    /// Collections probed for hostname correlation, in priority order
    #[arg(long, num_args = 1..)]
    correlation_collections: Option<Vec<String>>,

    /// Timestamp for records without one (RFC 3339, defaults to now)
    #[arg(long, value_parser = parse_timestamp)]
    timestamp: Option<String>,

    /// Drop raw request/response and raw record blobs from payloads
    #[arg(long)]
    omit_raw: bool,

    /// Use hash-based embeddings without trying the local model
    #[arg(long)]
    hash_embeddings: bool,
}

impl IngestArgs {
    /// Layer command-line flags over file configuration
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.qdrant.host = host.clone();
        }
        if let Some(port) = self.port {
            config.qdrant.port = port;
        }
        if self.host.is_some() || self.port.is_some() {
            config.qdrant.url = None;
        }
        if let Some(url) = &self.url {
            config.qdrant.url = Some(url.clone());
        }
        if let Some(size) = self.vector_size {
            config.embedding.dimension = size;
        }
        if let Some(batch_size) = self.batch_size {
            config.ingest.batch_size = batch_size;
        }
        if self.skip_correlation {
            config.correlation.enabled = false;
        }
        if let Some(collections) = &self.correlation_collections {
            config.correlation.collections = Some(collections.clone());
        }
        if self.hash_embeddings {
            config.embedding.use_model = false;
        }
    }
}

fn parse_timestamp(value: &str) -> std::result::Result<String, String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|_| value.to_string())
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    let (tool, args) = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "recon-ingest", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Dnsx(args) => (Tool::Dnsx, args),
        Commands::Nuclei(args) => (Tool::Nuclei, args),
        Commands::Subdomains(args) => (Tool::Subdomains, args),
        Commands::Whois(args) => (Tool::Whois, args),
        Commands::Sslscan(args) => (Tool::Sslscan, args),
        Commands::Json(args) => (Tool::Json, args),
    };

    // Load configuration, then let flags override it
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let store = QdrantStore::connect(&config.qdrant)?;
    info!("Using Qdrant at {}", store.url());

    let embedder = EmbeddingStrategy::select(&config.embedding);

    let options = IngestOptions {
        tool,
        input: args.input_file.clone(),
        collection: args
            .collection
            .clone()
            .unwrap_or_else(|| tool.default_collection().to_string()),
        batch_size: config.ingest.batch_size,
        embedding_batch_size: config.embedding.batch_size,
        correlation_collections: config
            .correlation
            .enabled
            .then(|| {
                config
                    .correlation
                    .collections
                    .clone()
                    .unwrap_or_else(|| tool.default_correlation_collections())
            }),
        normalize: NormalizeOptions {
            timestamp: args.timestamp.clone().unwrap_or_else(now_timestamp),
            omit_raw: args.omit_raw,
        },
        show_progress: !cli.json,
    };

    let stats = cmd_ingest(&store, &embedder, &options).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_ingest_stats(&stats);
    }

    Ok(())
}
