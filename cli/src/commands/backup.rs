use anyhow::{Result, bail};
use clap::Args;
use clustersnap_core::backup::{BackupCoordinator, BackupOptions};
use clustersnap_core::manifest::ManifestStatus;
use clustersnap_core::BackupId;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(long, help = "Reuse a backup id to resume a failed attempt")]
    backup_id: Option<String>,

    #[arg(long, help = "Label stored in every manifest of this backup")]
    label: Option<String>,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let backend = config.build_backend().await?;
        let transport = config.build_transport(backend.clone());

        let coordinator = BackupCoordinator::new(backend, transport, config.cluster())
            .with_limits(config.transfer_limits());

        let metadata = serde_json::json!({
            "label": self.label,
            "initiator": hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        });

        info!(nodes = config.nodes.len(), "Starting cluster backup");
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message(format!("Backing up {} nodes...", config.nodes.len()));

        let report = coordinator
            .run(BackupOptions {
                backup_id: self.backup_id.as_deref().map(BackupId::from),
                cluster_metadata: metadata,
            })
            .await?;

        pb.finish_and_clear();

        println!("Backup: {}", report.backup_id);
        for node in &report.nodes {
            match node.status {
                ManifestStatus::Complete => println!(
                    "  ✅ {}: {} uploaded, {} referenced, {} bytes",
                    node.node_id, node.uploaded, node.referenced, node.bytes_uploaded
                ),
                _ => println!(
                    "  ❌ {}: {}",
                    node.node_id,
                    node.failure.as_deref().unwrap_or("failed")
                ),
            }
        }

        if report.is_complete() {
            println!("✅ Backup set complete ({} nodes)", report.nodes.len());
            Ok(())
        } else {
            bail!(
                "backup {} incomplete; retry with --backup-id {}",
                report.backup_id,
                report.backup_id
            );
        }
    }
}
