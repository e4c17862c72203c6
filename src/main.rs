use chain_radar::price::{CoinGeckoPriceSource, PriceCache};
use chain_radar::rpc::{EndpointPool, HttpClientFactory};
use chain_radar::scanner::manager::ScanOptions;
use chain_radar::scanner::{BackfillRequest, ScanManager, WalletSettings};
use chain_radar::storage::{EntityStore, RadarDb, StoreEvent};
use chain_radar::utils::config::RadarConfig;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = chain_radar::utils::env_guard::load_dot_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    if loaded > 0 {
        tracing::info!("[ENV] loaded {} variable(s) from .env", loaded);
    }

    let config = RadarConfig::load()?;
    let db = Arc::new(RadarDb::open(&config.db_path)?);
    tracing::info!("[STARTUP] store at {}", db.path().display());

    let mut pool = EndpointPool::new(Arc::new(HttpClientFactory), config.pool);
    for network in &config.networks {
        pool.register(network)?;
        tracing::info!(
            "[STARTUP] {}: {} endpoint(s), primary {}",
            network.key,
            network.rpc_urls.len(),
            network.rpc_urls.first().map(String::as_str).unwrap_or("-")
        );
    }
    let pool = Arc::new(pool);

    let prices = config.wallet_scan_enabled.then(|| {
        Arc::new(PriceCache::new(
            Arc::new(CoinGeckoPriceSource::default()),
            Duration::from_secs(config.price_ttl_secs),
        ))
    });
    let options = ScanOptions {
        batch_size: config.batch_size,
        wallets: config.wallet_scan_enabled.then_some(WalletSettings {
            sample_size: config.wallet_sample_size,
            min_usd: config.wallet_min_usd,
        }),
    };

    let mut manager = ScanManager::new(Arc::clone(&pool), db.clone(), db.clone(), prices, options);
    for network in &config.networks {
        manager.add_network(network.clone())?;
    }
    let manager = Arc::new(manager);

    let mut feed = db.subscribe();
    let feed_task = tokio::spawn(async move {
        while let Ok(event) = feed.recv().await {
            if let StoreEvent::Updated(entity) = &event {
                tracing::debug!("[STORE] updated {}", entity.id());
            }
        }
    });

    if let Some(depth) = config.backfill_blocks {
        for network in manager.networks() {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let request = BackfillRequest::LookBack(depth);
                let contracts = manager.backfill(&network, request).await.map(Some);
                let wallets = manager.backfill_wallets(&network, request).await;
                for result in [contracts, wallets] {
                    match result {
                        Ok(Some(report)) => tracing::info!(
                            "[BACKFILL] {} {} finished: {:?}, {} block(s), {} record(s)",
                            network,
                            report.kind,
                            report.outcome,
                            report.blocks_scanned,
                            report.records_written
                        ),
                        Ok(None) => {}
                        Err(err) => tracing::warn!("[BACKFILL] {} failed: {}", network, err),
                    }
                }
            });
        }
    }

    manager.start_all()?;
    tracing::info!("[STARTUP] scanning {} network(s); Ctrl+C to stop", config.networks.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("[STARTUP] Ctrl+C received; stopping scanners");
    manager.stop_all();
    feed_task.abort();
    for network in manager.networks() {
        if let Ok(status) = manager.status(&network).await {
            tracing::info!(
                "[SCAN] {} final cursor {:?}, {} block(s) scanned",
                network,
                status.contracts.cursor,
                status.contracts.blocks_scanned
            );
        }
    }
    Ok(())
}
