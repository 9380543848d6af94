use tracing_subscriber::EnvFilter;

use listing_sync::SyncConfig;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,listing_sync=debug"));
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = SyncConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    tracing::info!(
        base_id = %config.airtable_base_id,
        table = %config.airtable_table_name,
        collection_id = %config.webflow_collection_id,
        interval_secs = config.sync_interval.map(|d| d.as_secs()),
        max_concurrency = config.max_concurrency,
        "starting listing sync worker"
    );

    let service = config.build_service().unwrap_or_else(|e| {
        eprintln!("Startup error: {e}");
        std::process::exit(1);
    });

    match config.sync_interval {
        Some(period) => {
            service
                .run_forever(period, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
        }
        None => {
            if let Err(e) = service.run_cycle().await {
                eprintln!("Sync failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
