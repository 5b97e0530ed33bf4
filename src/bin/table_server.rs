use clap::Parser;
use partition_lease::store::handlers::router;
use partition_lease::store::memory::InMemoryTableStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Serves an in-memory table store over HTTP so several nodes can share it.
#[derive(Parser, Debug)]
#[command(name = "table_server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:7000")]
    bind: SocketAddr,

    /// Maximum rows returned per scan page.
    #[arg(long, default_value_t = 1000)]
    page_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let store = Arc::new(InMemoryTableStore::with_page_size(cli.page_size));
    let app = router(store);

    tracing::info!("Table server listening on {}", cli.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
