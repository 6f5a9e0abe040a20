use anyhow::Result;
use chrono::Utc;
use clap::Args;
use clustersnap_core::manifest::ManifestStore;
use clustersnap_core::retention::{compute_purge_set, purge};
use tracing::info;

#[derive(Args)]
pub struct PurgeCommand {
    #[arg(long, help = "Compute and print the purge plan without deleting")]
    dry_run: bool,
}

impl PurgeCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let backend = config.build_backend().await?;
        let policy = config.retention_policy();

        if self.dry_run {
            let store = ManifestStore::new(backend.clone());
            let sets = store.list_sets().await?;
            let plan = compute_purge_set(&sets, &policy, Utc::now())?;

            if plan.is_noop() {
                println!("Nothing to purge ({} sets retained)", plan.retained_sets.len());
                return Ok(());
            }
            println!("Would delete {} backup set(s):", plan.delete_sets.len());
            for backup_id in &plan.delete_sets {
                println!("  {}", backup_id);
            }
            println!(
                "Would delete {} orphaned segment blob(s); {} set(s) retained",
                plan.delete_segments.len(),
                plan.retained_sets.len()
            );
            return Ok(());
        }

        info!("Running purge");
        let report = purge(&backend, &policy).await?;
        println!(
            "Purged {} backup set(s), {} segment blob(s), {} bytes reclaimed",
            report.deleted_sets.len(),
            report.deleted_segments,
            report.reclaimed_bytes
        );
        for backup_id in &report.deleted_sets {
            println!("  deleted {}", backup_id);
        }
        println!("{} backup set(s) retained", report.retained_sets.len());
        Ok(())
    }
}
