use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use radassist::cli::commands;

#[derive(Parser)]
#[command(name = "radassist")]
#[command(
  about = "radassist - Chest X-ray Report Assistant\nPathology detection, similar-case retrieval and report drafting"
)]
#[command(version)]
struct Cli {
  /// Config file (defaults to RADASSIST_CONFIG, ./radassist.yaml, then the user config dir)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Show step-by-step progress
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Detect pathologies on a chest radiograph
  Predict {
    /// PNG or JPEG radiograph
    image: PathBuf,
    /// Print the prediction as JSON
    #[arg(long)]
    json: bool,
  },
  /// Build the similar-case index from historical reports
  Ingest {
    /// Reports CSV with findings/impression columns
    csv: Option<PathBuf>,
    /// Dataset directory to search for the reports CSV
    #[arg(long, conflicts_with = "csv")]
    dataset_dir: Option<PathBuf>,
  },
  /// Find historical reports similar to the search terms
  Search {
    /// Search terms (space-separated)
    #[arg(required = true)]
    terms: Vec<String>,
    /// Number of reports to show
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
  },
  /// Analyze a radiograph and draft a full report
  Report {
    /// PNG or JPEG radiograph
    image: PathBuf,
    /// Print the case report as JSON
    #[arg(long)]
    json: bool,
  },
  /// Ask a follow-up question about a case
  Chat {
    /// The question
    message: String,
    /// JSON conversation file, read for context and appended to
    #[arg(long)]
    history: Option<PathBuf>,
    /// Case details to ground the answer (e.g. the drafted report)
    #[arg(long)]
    context: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  bentley::init(cli.verbose);

  let config = commands::load_config(cli.config)?;

  match cli.command {
    Commands::Predict { image, json } => {
      commands::predict(&config, &image, json)?;
    }
    Commands::Ingest { csv, dataset_dir } => {
      commands::ingest(&config, csv.as_deref(), dataset_dir.as_deref())?;
    }
    Commands::Search { terms, top_k } => {
      commands::search(&config, &terms, top_k)?;
    }
    Commands::Report { image, json } => {
      commands::report(&config, &image, json)?;
    }
    Commands::Chat { message, history, context } => {
      commands::chat(&config, &message, history.as_deref(), context.as_deref())?;
    }
  }

  Ok(())
}
