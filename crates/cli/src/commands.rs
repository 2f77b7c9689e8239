use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Process every discovered unit through every configured phase
    Run {
        #[arg(long, help = "Pipeline configuration file (JSON)")]
        config: PathBuf,

        #[arg(long, help = "State directory (defaults to ~/.hyperbatch/state)")]
        state: Option<PathBuf>,

        #[arg(long, help = "Manifest of units already processed elsewhere")]
        registry: Option<PathBuf>,

        #[arg(
            long,
            help = "If specified, writes the JSON report to this file instead of stdout"
        )]
        output: Option<PathBuf>,

        #[arg(long, help = "Chunk and price the pending work without calling the service")]
        dry_run: bool,
    },
    /// List the work units found under one or more roots
    Scan {
        #[arg(long = "root", required = true, help = "Directory to scan; repeatable")]
        roots: Vec<PathBuf>,

        #[arg(long, help = "Manifest of units already processed elsewhere")]
        registry: Option<PathBuf>,

        #[arg(long, help = "State directory consulted for dedup verdicts")]
        state: Option<PathBuf>,

        #[arg(long, help = "Print the units as JSON instead of a table")]
        json: bool,
    },
    /// Show durable progress for the run a configuration maps to
    Status {
        #[arg(long, help = "Pipeline configuration file (JSON)")]
        config: PathBuf,

        #[arg(long = "unit", help = "Unit id to inspect; repeatable")]
        units: Vec<String>,

        #[arg(long, help = "State directory (defaults to ~/.hyperbatch/state)")]
        state: Option<PathBuf>,

        #[arg(
            long,
            help = "If set, prints the progress information as JSON instead of a table"
        )]
        json: bool,
    },
    /// Normalize a raw phase output file into its canonical record
    Normalize {
        #[arg(long, help = "Raw JSON output to normalize")]
        file: PathBuf,

        #[arg(long, help = "Phase whose shape rules apply")]
        phase: String,

        #[arg(long, help = "Pipeline configuration file (JSON)")]
        config: PathBuf,
    },
    /// Check a configuration without running anything
    ValidateConfig {
        #[arg(long, help = "Pipeline configuration file (JSON)")]
        config: PathBuf,
    },
}
