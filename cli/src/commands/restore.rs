use anyhow::{Result, bail};
use clap::Args;
use clustersnap_core::restore::{NodeRestoreState, RestoreCoordinator};
use clustersnap_core::{BackupId, RestoreId};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Backup id to restore from")]
    backup_id: Option<String>,

    #[arg(long, help = "Resume a previous restore by its restore id")]
    resume: Option<String>,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let backend = config.build_backend().await?;
        let transport = config.build_transport(backend.clone());

        let coordinator = RestoreCoordinator::new(backend, transport, config.cluster())
            .with_quorum(config.quorum())
            .with_limits(config.transfer_limits());

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(120));

        let report = match (&self.resume, &self.backup_id) {
            (Some(restore_id), _) => {
                info!(%restore_id, "Resuming restore");
                pb.set_message(format!("Resuming restore {restore_id}..."));
                coordinator.resume(&RestoreId::from(restore_id.as_str())).await?
            }
            (None, Some(backup_id)) => {
                info!(%backup_id, "Starting restore");
                pb.set_message(format!("Restoring backup {backup_id}..."));
                coordinator.run(&BackupId::from(backup_id.as_str())).await?
            }
            (None, None) => bail!("either a backup id or --resume is required"),
        };

        pb.finish_and_clear();

        println!("Restore: {} (backup {})", report.restore_id, report.backup_id);
        for (node_id, state) in &report.nodes {
            match state {
                NodeRestoreState::Activated => println!("  ✅ {}: activated", node_id),
                NodeRestoreState::Failed { error } => println!("  ❌ {}: {}", node_id, error),
                other => println!("  ⏸ {}: {:?}", node_id, other),
            }
        }
        println!(
            "  {} bytes downloaded, {} segments already staged",
            report.bytes_downloaded, report.segments_skipped
        );

        if report.succeeded() {
            println!("✅ Restore complete");
            Ok(())
        } else {
            bail!(
                "restore aborted; resume with --resume {}",
                report.restore_id
            );
        }
    }
}
