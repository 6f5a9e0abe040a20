use anyhow::Result;
use clap::Args;
use clustersnap_core::manifest::ManifestStore;

#[derive(Args)]
pub struct BackupsCommand {}

impl BackupsCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let config = cli.load_config()?;
        let backend = config.build_backend().await?;
        let store = ManifestStore::new(backend);

        let sets = store.list_sets().await?;
        if sets.is_empty() {
            println!("No backups found");
            return Ok(());
        }

        println!(
            "{:<38} {:<22} {:>5} {:>12} {:>9}",
            "BACKUP ID", "STARTED", "NODES", "SIZE", "STATUS"
        );
        for set in sets {
            println!(
                "{:<38} {:<22} {:>5} {:>12} {:>9}",
                set.backup_id.to_string(),
                set.started_at().format("%Y-%m-%d %H:%M:%S"),
                set.node_count(),
                format_size(set.total_size()),
                if set.is_complete() { "complete" } else { "partial" },
            );
        }
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
