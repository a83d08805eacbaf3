/// Pool Mirror Usage Example
///
/// Mirrors every router's pools from a live node and prints the cache periodically.
/// Configuration comes from `MIRROR_CONFIG` (TOML path) or the environment:
/// `RPC_WSS_URL`, `RPC_HTTP_URL`, `PORTAL_ADDRESS`, `ORACLE_ADDRESS`.
use eyre::Result;
use pool_mirror::{LinearCurve, MirrorConfig, MirrorServiceBuilder};
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: no .env file loaded: {}", e);
    }

    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

    info!("Starting pool mirror monitor");

    let config = match std::env::var("MIRROR_CONFIG") {
        Ok(path) => MirrorConfig::load(path).await?,
        Err(_) => MirrorConfig::from_env()?,
    };
    info!("Configuration loaded: WebSocket={}, HTTP={}", config.rpc_wss_url, config.rpc_http_url);

    let run_for = Duration::from_secs(std::env::var("MONITOR_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(60));

    let mut service = MirrorServiceBuilder::new().with_config(config).with_curve(Arc::new(LinearCurve)).build()?;
    let routers = service.start().await?;
    for router in &routers {
        info!("Router {} with {} pools", router.address, router.pools.len());
    }

    let mut ticker = interval(Duration::from_secs(10));
    let result = tokio::time::timeout(run_for, async {
        loop {
            ticker.tick().await;

            let pipeline = service.pipeline_stats();
            let sampler = service.sampler_stats();
            info!(
                "Events applied={} dropped={} failed={} reconciliations={} | price passes={} skipped={} failures={}",
                pipeline.applied(),
                pipeline.dropped(),
                pipeline.failed(),
                pipeline.reconciliations(),
                sampler.passes(),
                sampler.skipped_ticks(),
                sampler.price_failures()
            );

            for snapshot in service.store().snapshots() {
                match snapshot.ready() {
                    Ok(pool) => info!(
                        "  pool {} asset {} reserve={} liabilities={} price={}",
                        pool.pool,
                        pool.asset.get_address(),
                        pool.asset.to_float(pool.state.reserves.reserve),
                        pool.asset.to_float(pool.state.reserves.total_liabilities),
                        pool.price
                    ),
                    Err(e) => info!("  {}", e),
                }
            }
        }
    })
    .await;

    if result.is_err() {
        info!("Monitoring finished after {:?}", run_for);
    }

    if let Err(e) = service.stop().await {
        error!("Error stopping mirror service: {}", e);
    }
    Ok(())
}
