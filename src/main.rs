use anyhow::Result;
use detection_feed::api::RestApi;
use detection_feed::catalog::{CatalogBrowser, FsCatalogBrowser};
use detection_feed::config;
use detection_feed::db::repositories::{ItemStore, ItemsRepository, MemoryItemStore};
use detection_feed::db::DatabaseService;
use detection_feed::feed::{ClipMatcher, EventNormalizer, FeedManager, RecordingResolver};
use detection_feed::registry::{SensorRegistry, StaticSensorRegistry};
use detection_feed::snapshot::{PlaceholderSnapshotWriter, SnapshotTrigger};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

async fn run_app() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = config::load_config(config_path.as_deref().map(Path::new))?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.api.log_level.clone()),
    )
    .init();
    info!("Starting detection feed service");

    // Pick the item store: PostgreSQL when configured, in-memory otherwise
    let store: Arc<dyn ItemStore> = if config.database.url.is_empty() {
        warn!("No database configured; items will not survive a restart");
        Arc::new(MemoryItemStore::new())
    } else {
        let database = DatabaseService::new(&config.database).await?;
        Arc::new(ItemsRepository::new(Arc::clone(&database.pool)))
    };

    let registry: Arc<dyn SensorRegistry> =
        Arc::new(StaticSensorRegistry::new(&config.feed.sensors));
    let normalizer = EventNormalizer::new(Arc::clone(&registry), &config.feed.enabled_labels);

    let browser: Arc<dyn CatalogBrowser> = Arc::new(FsCatalogBrowser::new(&config.catalog.root));
    let matcher = ClipMatcher::new(
        Arc::clone(&browser),
        config.catalog.clone(),
        config.feed.lookback_s + config.feed.lookahead_s,
    );
    let resolver = Arc::new(RecordingResolver::new(
        Arc::clone(&store),
        matcher,
        Arc::clone(&browser),
        &config.feed,
    ));

    let media_root = config.snapshot.media_root.clone();
    std::fs::create_dir_all(&media_root)?;
    let snapshots: Arc<dyn SnapshotTrigger> =
        Arc::new(PlaceholderSnapshotWriter::new(&media_root));

    let manager = Arc::new(FeedManager::new(
        config.feed.clone(),
        store,
        normalizer,
        resolver,
        snapshots,
        None,
    ));
    manager.start().await?;

    let http_server = RestApi::new(&config.api, Arc::clone(&manager), media_root);
    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            error!("API server error: {}", e);
        }
    });

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    manager.stop().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
