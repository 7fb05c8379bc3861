mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    backlog::BacklogSubcommand, config::ConfigSubcommand, phase::PhaseSubcommand,
    reconcile::ReconcileArgs,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "specflow",
    about = "Phase registry for spec-driven development: number, move, and reconcile roadmap phases",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .specflow/ or .git/)
    #[arg(long, global = true, env = "SPECFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize specflow in the current project
    Init {
        /// Roadmap title (default: the directory name)
        #[arg(long)]
        title: Option<String>,
    },

    /// Manage roadmap phases
    Phase {
        #[command(subcommand)]
        subcommand: PhaseSubcommand,
    },

    /// Manage the backlog
    Backlog {
        #[command(subcommand)]
        subcommand: BacklogSubcommand,
    },

    /// Widen legacy three-digit phase keys to four digits
    Migrate,

    /// Show roadmap progress and the reconciliation report
    Status,

    /// Show the single recommended next action
    Next,

    /// Compare the snapshot cache with the filesystem and optionally fix it
    Reconcile(ReconcileArgs),

    /// Show or validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { title } => cmd::init::run(&root, title.as_deref()),
        Commands::Phase { subcommand } => cmd::phase::run(&root, subcommand, cli.json),
        Commands::Backlog { subcommand } => cmd::backlog::run(&root, subcommand, cli.json),
        Commands::Migrate => cmd::migrate::run(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Next => cmd::next::run(&root, cli.json),
        Commands::Reconcile(args) => cmd::reconcile::run(&root, args, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
