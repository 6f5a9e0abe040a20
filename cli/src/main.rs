mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    backup::BackupCommand, backups::BackupsCommand, purge::PurgeCommand, restore::RestoreCommand,
};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "clustersnap",
    about = "Cluster backup and restore orchestrator",
    long_about = "Clustersnap backs up a replicated storage cluster to an object store \
                  with content-addressed deduplication across nodes and generations"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        env = "CLUSTERSNAP_CONFIG",
        default_value = "cluster.toml",
        help = "Cluster configuration file"
    )]
    config: PathBuf,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        Config::load(&self.config)
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Back up every cluster node")]
    Backup(BackupCommand),

    #[command(about = "Restore the cluster from a backup set")]
    Restore(RestoreCommand),

    #[command(about = "List stored backup sets")]
    Backups(BackupsCommand),

    #[command(about = "Apply the retention policy and reclaim space")]
    Purge(PurgeCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&cli).await,
        Commands::Restore(ref cmd) => cmd.run(&cli).await,
        Commands::Backups(ref cmd) => cmd.run(&cli).await,
        Commands::Purge(ref cmd) => cmd.run(&cli).await,
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "clustersnap={level},clustersnap_core={level},clustersnap_backends={level}"
        )))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
