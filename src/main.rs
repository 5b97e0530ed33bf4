use anyhow::Context;
use clap::Parser;
use dashmap::DashMap;
use partition_lease::config::ParticipantConfig;
use partition_lease::partitioning::{ParticipantCallbacks, PartitionId, PartitioningService};
use partition_lease::store::http::HttpTableStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Partition leasing node: joins a partition space and holds its share of it.
#[derive(Parser, Debug)]
#[command(name = "partition_lease")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the table server.
    #[arg(long, default_value = "http://127.0.0.1:7000")]
    store_url: String,

    #[arg(long)]
    table: Option<String>,

    /// Defaults to a random `N123` style id.
    #[arg(long)]
    node_id: Option<String>,

    #[arg(long)]
    partitions: Option<u32>,

    #[arg(long)]
    heartbeat_secs: Option<u64>,

    #[arg(long)]
    lease_validity_secs: Option<u64>,

    #[arg(long)]
    acquire_older_than_secs: Option<u64>,

    #[arg(long)]
    max_partitions: Option<usize>,

    #[arg(long)]
    max_acquires: Option<usize>,

    /// Seconds between ownership reports.
    #[arg(long, default_value_t = 30)]
    stats_secs: u64,
}

impl Cli {
    fn participant_config(&self) -> anyhow::Result<ParticipantConfig> {
        let mut config = match &self.config {
            Some(path) => ParticipantConfig::from_toml_file(path)
                .with_context(|| format!("failed to load config from {:?}", path))?,
            None => ParticipantConfig::default(),
        };

        if let Some(table) = &self.table {
            config.table_name = table.clone();
        }
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(partitions) = self.partitions {
            config.num_partitions = partitions;
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = self.lease_validity_secs {
            config.lease_validity_secs = secs;
        }
        if let Some(secs) = self.acquire_older_than_secs {
            config.acquire_older_than_secs = secs;
        }
        if let Some(max) = self.max_partitions {
            config.max_partitions_per_node = max;
        }
        if let Some(max) = self.max_acquires {
            config.max_acquires_per_cycle = max;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Demo consumer: tracks what it was given and reports a made-up load.
#[derive(Default)]
struct DemoApp {
    partitions: DashMap<PartitionId, u64>,
}

impl ParticipantCallbacks for DemoApp {
    fn got_partition(&self, partition: &PartitionId) {
        if self.partitions.contains_key(partition) {
            tracing::error!("Already have partition {}", partition);
            return;
        }
        self.partitions.insert(partition.clone(), 0);
        tracing::info!("Now serving partition {}", partition);
    }

    fn lost_partition(&self, partition: &PartitionId) {
        if self.partitions.remove(partition).is_none() {
            tracing::error!("Lost partition {} that was never served", partition);
            return;
        }
        tracing::info!("Stopped serving partition {}", partition);
    }

    fn current_load(&self, partition: &PartitionId) -> String {
        let Some(mut renewals) = self.partitions.get_mut(partition) else {
            tracing::error!("Load requested for partition {} that is not served", partition);
            return String::new();
        };
        *renewals += 1;
        format!("CPU:{};tps:{};renewals:{}", rand::random::<u8>() % 100, 40, *renewals)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.participant_config()?;

    tracing::info!(
        "Starting node {} against {} (table {})",
        config.node_id,
        cli.store_url,
        config.table_name
    );

    // 1. Store client and participant:
    let store = Arc::new(HttpTableStore::new(&cli.store_url));
    let app = Arc::new(DemoApp::default());
    let service = PartitioningService::new(store, config, app.clone());

    service
        .start()
        .await
        .context("failed to join the partition space")?;

    // 2. Spawn stats reporter:
    let stats_service = service.clone();
    let stats_interval = Duration::from_secs(cli.stats_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);

        loop {
            interval.tick().await;
            let (Ok(owned), Ok(map)) = (stats_service.list_owned(), stats_service.partition_map())
            else {
                continue;
            };

            let mut per_owner: BTreeMap<String, usize> = BTreeMap::new();
            for owner in map.values() {
                *per_owner.entry(owner.clone()).or_default() += 1;
            }

            tracing::info!(
                "Node {} holds {} of {} partitions ({} served)",
                stats_service.node_id(),
                owned.len(),
                map.len(),
                app.partitions.len()
            );
            for (owner, count) in per_owner {
                tracing::info!("  - {}: {}", owner, count);
            }
        }
    });

    // 3. Run until interrupted:
    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    service.shutdown().await;

    Ok(())
}
