use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use review_queue::catalog::ItemCatalog;
use review_queue::config::{CoordinatorConfig, RemoteConfig, ServerConfig, StoreConfig};
use review_queue::coordinator::{Coordinator, Decision};
use review_queue::export;
use review_queue::server::Server;
use review_queue::shutdown::install_shutdown_handler;
use review_queue::store::{StateBackend, TieredStore};

#[derive(Parser, Debug)]
#[command(name = "review-queue")]
#[command(version)]
#[command(about = "Shared review queue that never hands the same item to two people")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the review API server
    Serve(ServeArgs),

    /// Print progress from the persisted state
    Progress {
        #[command(flatten)]
        state: StateArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Export completed items from the persisted state as CSV
    Export {
        /// Which completed set to export
        category: Category,

        /// Output file (defaults to a timestamped name in the working directory)
        #[arg(long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        state: StateArgs,
    },
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct StateArgs {
    /// CSV file with `company_name` and `website` columns
    #[arg(long, env = "CATALOG_PATH", default_value = "items.csv")]
    catalog: PathBuf,

    /// Local state cache file
    #[arg(long, env = "STATE_FILE", default_value = "shared_state.json")]
    state_file: PathBuf,

    /// Token for the remote state tier
    #[arg(long, env = "REMOTE_TOKEN", hide_env_values = true)]
    remote_token: Option<String>,

    /// Resource id of the remote state tier
    #[arg(long, env = "REMOTE_RESOURCE_ID")]
    remote_resource_id: Option<String>,

    /// Base URL of the remote state API
    #[arg(long, env = "REMOTE_API_BASE", default_value = RemoteConfig::DEFAULT_API_BASE)]
    remote_api: String,

    /// Seconds to wait for the remote tier when flushing on exit
    #[arg(long, env = "FLUSH_TIMEOUT_SECS", default_value = "15")]
    flush_timeout_secs: u64,
}

impl StateArgs {
    fn store_config(&self) -> StoreConfig {
        let remote = RemoteConfig::from_parts(
            self.remote_token.clone(),
            self.remote_resource_id.clone(),
        )
        .map(|r| r.with_api_base(self.remote_api.clone()));
        StoreConfig::new(&self.state_file)
            .with_remote(remote)
            .with_flush_timeout(Duration::from_secs(self.flush_timeout_secs))
    }
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Seconds of inactivity before a session's item is reclaimed
    #[arg(long, env = "SESSION_TIMEOUT_SECS", default_value = "300")]
    session_timeout_secs: u64,

    #[command(flatten)]
    state: StateArgs,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Category {
    Liked,
    Disliked,
}

impl From<Category> for Decision {
    fn from(c: Category) -> Self {
        match c {
            Category::Liked => Decision::Liked,
            Category::Disliked => Decision::Disliked,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = ServerConfig {
        listen_addr,
        catalog_path: args.state.catalog.clone(),
        coordinator: CoordinatorConfig::default()
            .with_session_timeout(Duration::from_secs(args.session_timeout_secs)),
        store: args.state.store_config(),
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        catalog = %config.catalog_path.display(),
        state_file = %config.store.local_path.display(),
        remote_enabled = config.store.remote.is_some(),
        session_timeout_secs = args.session_timeout_secs,
        "Starting review-queue"
    );

    let shutdown = install_shutdown_handler();
    let server = Server::new(config).await?;
    server.run(shutdown).await
}

async fn open_offline(state: &StateArgs) -> Result<Coordinator, Box<dyn std::error::Error>> {
    let catalog = Arc::new(ItemCatalog::load(&state.catalog)?);
    let store: Arc<dyn StateBackend> = Arc::new(TieredStore::from_config(&state.store_config()));
    Ok(Coordinator::open(catalog, store, CoordinatorConfig::default()).await)
}

async fn handle_progress(
    state: StateArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let coordinator = open_offline(&state).await?;
    let stats = coordinator.stats().await;

    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        OutputFormat::Table => {
            let p = &stats.progress;
            println!("Progress");
            println!("{}", "=".repeat(40));
            println!("Total:      {}", p.total);
            println!("Completed:  {} ({}%)", p.completed, p.percent_complete);
            println!("  Liked:    {}", p.liked);
            println!("  Disliked: {}", p.disliked);
            println!("Assigned:   {}", p.assigned);
            println!("Remaining:  {}", p.remaining);
            println!("Cursor:     {}", stats.global_cursor);
            println!("Revision:   {}", stats.revision);

            let leaderboard = coordinator.leaderboard().await;
            if !leaderboard.is_empty() {
                println!();
                println!("{:<24} {:>8} {:>8} {:>8}", "USER", "REVIEWS", "LIKED", "LIKE %");
                println!("{}", "-".repeat(52));
                for row in leaderboard {
                    println!(
                        "{:<24} {:>8} {:>8} {:>8}",
                        row.username, row.reviews, row.liked, row.like_rate
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_export(
    category: Category,
    out: Option<PathBuf>,
    state: StateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let decision = Decision::from(category);
    let coordinator = open_offline(&state).await?;
    let items = coordinator.completed(decision).await;
    if items.is_empty() {
        return Err(format!("No {} items to export", decision).into());
    }

    let path =
        out.unwrap_or_else(|| PathBuf::from(export::export_file_name(decision, chrono::Utc::now())));
    let file = std::fs::File::create(&path)?;
    export::write_csv(coordinator.catalog().extra_columns(), &items, file)?;

    println!("Exported {} {} items to {}", items.len(), decision, path.display());
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await?,
        Commands::Progress { state, output } => handle_progress(state, output).await?,
        Commands::Export {
            category,
            out,
            state,
        } => handle_export(category, out, state).await?,
    }

    Ok(())
}
