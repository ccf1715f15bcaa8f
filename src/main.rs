use std::io::{self, BufWriter};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chado_io::config::Config;
use chado_io::db::{self, Database};
use chado_io::exporter::{ExportOptions, OrganismSelector};
use chado_io::formats::Dialect;
use chado_io::models::OrganismSpec;
use chado_io::pipeline::{self, CancelToken, ExportRequest, ImportRequest};

#[derive(Parser)]
#[command(name = "chado-io")]
#[command(about = "Import and export genome annotation against a Chado store")]
struct Cli {
    /// Store to use instead of the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load one file as a single all-or-nothing unit
    Import {
        dialect: Dialect,

        #[arg(short, long)]
        file: PathBuf,

        /// Organism abbreviation
        #[arg(short, long)]
        organism: String,

        #[command(flatten)]
        names: OrganismArgs,

        /// Type for new sequence entries that declare none
        #[arg(long)]
        sequence_type: Option<String>,
    },
    /// Write stored features in a flat-file dialect
    Export {
        dialect: Dialect,

        #[arg(short, long, required_unless_present = "all", conflicts_with = "all")]
        organism: Option<String>,

        /// Export every organism
        #[arg(long)]
        all: bool,

        /// Output file (stdout when absent)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(long)]
        include_obsolete: bool,

        /// FASTA only: export every feature of this type
        #[arg(long)]
        sequence_type: Option<String>,
    },
}

/// Names that let an import create its organism
#[derive(Args)]
struct OrganismArgs {
    #[arg(long, requires = "species")]
    genus: Option<String>,

    #[arg(long, requires = "genus")]
    species: Option<String>,

    #[arg(long, requires = "genus")]
    strain: Option<String>,
}

/// Initialize tracing with output to stderr so stdout stays clean for exports
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "chado_io=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(cli_db: Option<PathBuf>, config: &Config) -> anyhow::Result<Database> {
    let path = match cli_db.or_else(|| config.database.clone()) {
        Some(path) => path,
        None => db::default_path()?,
    };
    tracing::debug!("Using store {}", path.display());
    let db = Database::open(path)?;
    db.migrate()?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load();
    let db = open_database(cli.db, &config)?;

    match cli.command {
        Commands::Import {
            dialect,
            file,
            organism,
            names,
            sequence_type,
        } => {
            let organism = match (names.genus, names.species) {
                (Some(genus), Some(species)) => {
                    OrganismSpec::declared(organism, genus, species, names.strain)
                }
                _ => OrganismSpec::existing(organism),
            };
            let request = ImportRequest {
                dialect,
                organism,
                default_sequence_type: sequence_type,
            };

            let cancel = CancelToken::new();
            let mut handle = {
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || {
                    pipeline::import_file(&db, &config, &request, &file, &cancel)
                })
            };

            let outcome = tokio::select! {
                outcome = &mut handle => outcome,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, rolling back");
                    cancel.cancel();
                    handle.await
                }
            };
            let report = outcome.context("Import task failed")??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export {
            dialect,
            organism,
            all: _,
            out,
            include_obsolete,
            sequence_type,
        } => {
            let selector = match organism {
                Some(abbreviation) => OrganismSelector::One(abbreviation),
                None => OrganismSelector::All,
            };
            let request = ExportRequest {
                dialect,
                options: ExportOptions {
                    organism: selector,
                    include_obsolete,
                    sequence_type,
                },
            };

            let summary = match out {
                Some(path) => pipeline::export_file(&db, &config, &request, &path)?,
                None => {
                    let stdout = io::stdout();
                    let mut writer = BufWriter::new(stdout.lock());
                    pipeline::export_to_writer(&db, &config, &request, &mut writer)?
                }
            };
            if summary.skipped > 0 {
                tracing::warn!("{} features skipped", summary.skipped);
            }
        }
    }

    Ok(())
}
