//! cf-recos - publish Top-K collaborative-filtering recommendations.
//!
//! Usage:
//!   cf-recos publish --events media_events.jsonl --model als_model.npz --model-version als_v1 --k 200
//!   cf-recos publish ... --dry-run --output rows.jsonl
//!   cf-recos inspect --model als_model.npz

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use cf_recos::config::{PublisherConfig, RecommendConfig, DEFAULT_CHUNK_SIZE, DEFAULT_K};
use cf_recos::pipeline::{describe_artifact, run_publish, Destination, PublishRun};
use cf_recos::{Result, SeenPolicy, SignalPolicy, Similarity};

#[derive(Parser)]
#[command(name = "cf-recos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute Top-K recommendations and upsert them
    Publish {
        /// Interaction log (JSON lines)
        #[arg(long, value_name = "FILE")]
        events: PathBuf,

        /// Factor artifact (.npz)
        #[arg(long, value_name = "FILE")]
        model: PathBuf,

        /// Version label stored with every row, e.g. als_v1
        #[arg(long)]
        model_version: String,

        /// Recommendations per user
        #[arg(long, default_value_t = DEFAULT_K)]
        k: usize,

        /// Affinity between user and item vectors: dot or cosine
        #[arg(long, default_value = "dot")]
        similarity: Similarity,

        /// Interactions that block re-recommendation: `all` never repeats
        /// anything the user touched, `positive` only repeats-blocks liked items
        #[arg(long, default_value = "all")]
        seen_policy: SeenPolicy,

        /// Rows per upsert request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Compute rows without contacting the store
        #[arg(long)]
        dry_run: bool,

        /// Also write the rows as JSON lines
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show stored arrays and how the loader reconciles them
    Inspect {
        #[arg(long, value_name = "FILE")]
        model: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn inspect(model: PathBuf) -> Result<()> {
    let desc = describe_artifact(&model)?;
    println!("{}", model.display());
    for info in &desc.arrays {
        match &info.layout {
            Ok((descr, shape)) => println!("  {:<20} {:<8} {:?}", info.key, descr, shape),
            Err(e) => println!("  {:<20} unreadable: {e}", info.key),
        }
    }
    match desc.load {
        Ok((report, user_shape, item_shape)) => {
            println!("user factors: {user_shape:?} from `{}`", report.user_factor_key);
            println!("item factors: {item_shape:?} from `{}`", report.item_factor_key);
            println!(
                "transposed: user={} item={}  swapped: {}  synthesized ids: user={} item={}",
                report.user_transposed,
                report.item_transposed,
                report.swapped,
                report.user_ids_synthesized,
                report.item_ids_synthesized
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish {
            events,
            model,
            model_version,
            k,
            similarity,
            seen_policy,
            chunk_size,
            dry_run,
            output,
        } => {
            // Credentials are checked before any work so a long run cannot
            // end in a missing-variable failure.
            let destination = if dry_run {
                Destination::DryRun { chunk_size }
            } else {
                Destination::Remote(PublisherConfig::from_env()?.with_chunk_size(chunk_size))
            };

            let run = PublishRun {
                events,
                model,
                model_version,
                recommend: RecommendConfig {
                    k,
                    similarity,
                    seen_policy,
                },
                signal: SignalPolicy::default(),
                output,
            };
            let summary = run_publish(&run, &destination)?;
            println!(
                "Prepared {} recommendation rows (users={}, items={})",
                summary.rows, summary.users, summary.items
            );
            match summary.distinct_keys {
                Some(keys) => println!("Dry run: {keys} distinct rows, nothing published"),
                None => println!(
                    "Published {} rows in {} chunks",
                    summary.published.rows, summary.published.chunks
                ),
            }
            Ok(())
        }
        Commands::Inspect { model } => inspect(model),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
