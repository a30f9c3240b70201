mod content;
mod db;
mod images;
mod importer;
mod source;

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use images::DisabledImageStore;
use importer::ImportContext;
use source::SourceClient;

#[derive(Parser)]
#[command(name = "wp_importer", about = "Legacy WordPress article import pipeline")]
struct Cli {
    /// Export endpoint of the legacy site (falls back to WP_SOURCE_URL, then
    /// the built-in default)
    #[arg(long)]
    source: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local schema
    Init,
    /// Discover the export size and enqueue one batch per page
    ImportAll,
    /// Drain queued batches: fetch payloads and import every article
    Work {
        /// Max batches to process (default: all runnable)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Dispatch + drain in one pipeline
    Run {
        /// Max batches to process after dispatching
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Import a single article by its remote id
    Single {
        /// Remote article id
        id: i64,
    },
    /// Show import statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let base_url = cli
        .source
        .or_else(|| std::env::var("WP_SOURCE_URL").ok())
        .unwrap_or_else(|| source::DEFAULT_SOURCE_URL.to_string());

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            println!("Schema ready.");
            Ok(())
        }
        Commands::ImportAll => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = SourceClient::new(base_url);
            let dispatched = importer::start_full_import(&conn, &client).await?;
            println!("Dispatched {} batches. Run 'work' to process them.", dispatched);
            Ok(())
        }
        Commands::Work { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = Arc::new(SourceClient::new(base_url));
            let stats = importer::run_pending(
                &conn,
                client,
                &DisabledImageStore,
                ImportContext::default(),
                limit,
            )
            .await?;
            if stats.batches == 0 {
                println!("No runnable batches. Run 'import-all' first.");
            } else {
                print_run_stats(&stats);
            }
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = Arc::new(SourceClient::new(base_url));

            let dispatched = importer::start_full_import(&conn, &client).await?;
            println!("Dispatched {} batches, processing...", dispatched);

            let stats = importer::run_pending(
                &conn,
                Arc::clone(&client),
                &DisabledImageStore,
                ImportContext::default(),
                limit,
            )
            .await?;
            print_run_stats(&stats);
            Ok(())
        }
        Commands::Single { id } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let client = SourceClient::new(base_url);
            let article_id = importer::import_one(
                &conn,
                &client,
                &DisabledImageStore,
                ImportContext::default(),
                id,
            )
            .await?;
            println!("Imported article {} (local id {}).", id, article_id);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Articles:        {}", s.articles);
            println!("Imported:        {}", s.imported);
            println!("Categories:      {}", s.categories);
            println!("Tags:            {}", s.tags);
            println!("Pending batches: {}", s.pending_batches);
            println!("Errored batches: {}", s.errored_batches);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_run_stats(stats: &importer::RunStats) {
    println!(
        "Processed {} batches ({} failed), {} articles imported, {} failed.",
        stats.batches, stats.failed_batches, stats.ok_items, stats.failed_items
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
