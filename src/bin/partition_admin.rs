use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use partition_lease::admin::{PartitionAdmin, PartitionSnapshot, SpaceLayout};
use partition_lease::partitioning::{NodeId, PartitionId};
use partition_lease::store::http::HttpTableStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Administration of a partition space.
#[derive(Parser, Debug)]
#[command(name = "partition_admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the table server.
    #[arg(long, global = true, default_value = "http://127.0.0.1:7000")]
    store_url: String,

    #[arg(long, global = true, default_value = "partitions")]
    table: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the table, its partition rows and control rows.
    Create(CreateArgs),
    /// Delete the table and every row in it.
    Delete,
    /// Take a partition away from its holder.
    Kick {
        partition: String,
        /// Node barred from re-acquiring the partition until `allow`.
        #[arg(long)]
        disallow: Option<String>,
    },
    /// Mark a partition as not to be loaded.
    Invalidate { partition: String },
    /// Clear the invalid mark.
    Validate { partition: String },
    /// Clear a node exclusion set by `kick --disallow`.
    Allow { partition: String },
    /// Print every partition row.
    Show,
    /// Print partitions whose rows did not change while waiting.
    Stale {
        #[arg(long, default_value_t = 60)]
        wait: u64,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long, default_value_t = 1024)]
    partitions: u32,

    #[arg(long, default_value_t = 256)]
    max_partitions: u32,

    #[arg(long, default_value_t = 4)]
    max_acquires: u32,
}

fn show(snapshots: &[PartitionSnapshot]) {
    for snapshot in snapshots {
        println!("PartitionID:\t{}", snapshot.partition_id);
        println!("Token:\t{}", snapshot.token);
        println!("Timestamp:\t{}", snapshot.timestamp_ms);
        for (name, value) in &snapshot.properties {
            println!("{}:\t{}", name, value);
        }
        println!("-----------------------------------------------");
        println!();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let store = Arc::new(HttpTableStore::new(&cli.store_url));
    let admin = PartitionAdmin::new(store, cli.table.clone());

    match cli.command {
        Commands::Create(args) => {
            admin
                .create_space(SpaceLayout {
                    partition_count: args.partitions,
                    max_partitions_per_node: args.max_partitions,
                    max_acquires_per_cycle: args.max_acquires,
                })
                .await
                .with_context(|| format!("failed to create partition space {}", cli.table))?;
            println!("Created {} partitions in {}", args.partitions, cli.table);
        }
        Commands::Delete => {
            if admin.delete_space().await? {
                println!("Deleted {}", cli.table);
            } else {
                println!("{} does not exist", cli.table);
            }
        }
        Commands::Kick {
            partition,
            disallow,
        } => {
            let disallow = disallow.map(NodeId);
            admin
                .kick(&PartitionId(partition.clone()), disallow.as_ref())
                .await?;
            println!("Kicked {}", partition);
        }
        Commands::Invalidate { partition } => {
            admin.set_invalid(&PartitionId(partition.clone()), true).await?;
            println!("Invalidated {}", partition);
        }
        Commands::Validate { partition } => {
            admin.set_invalid(&PartitionId(partition.clone()), false).await?;
            println!("Validated {}", partition);
        }
        Commands::Allow { partition } => {
            admin.allow(&PartitionId(partition.clone())).await?;
            println!("Cleared exclusion on {}", partition);
        }
        Commands::Show => show(&admin.snapshot().await?),
        Commands::Stale { wait } => {
            println!("Watching {} for {}s...", cli.table, wait);
            let stale = admin.detect_stale(Duration::from_secs(wait)).await?;
            show(&stale);
            println!("{} stale partitions", stale.len());
        }
    }

    Ok(())
}
