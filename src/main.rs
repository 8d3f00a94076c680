use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use env_logger::Env;

use syncsnap::auth::{AuthKeys, SystemCredentials};
use syncsnap::config::Config;
use syncsnap::database::{establish_connection, MemorySnapStore, PgSnapStore, SnapStore};
use syncsnap::handlers;
use syncsnap::media::{
    CompositingService, HttpCompositor, HttpObjectStorage, LocalCompositor, MemoryObjectStorage,
    ObjectStorage,
};
use syncsnap::realtime::{Broadcaster, OfflineBroadcaster, RelayConfig, RelayNotifier};
use syncsnap::snaps::{ShapeCatalog, SnapService, SnapSettings};
use syncsnap::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env()?;
    log::debug!("loaded {:?}", config);

    let store: Arc<dyn SnapStore> = match &config.database_url {
        Some(url) => {
            let pool = establish_connection(url, config.database_pool_size)
                .context("could not build the database pool")?;
            Arc::new(PgSnapStore::new(pool))
        }
        None => {
            log::warn!("DATABASE_URL not set, snaps are kept in memory");
            Arc::new(MemorySnapStore::new())
        }
    };

    let catalog = match &config.shapes_file {
        Some(path) => ShapeCatalog::load(path)
            .with_context(|| format!("could not load shapes from {}", path.display()))?,
        None => ShapeCatalog::builtin(),
    };
    log::info!("{} shapes available", catalog.shapes().len());

    let client = reqwest::Client::new();
    let storage: Arc<dyn ObjectStorage> = match &config.storage.endpoint {
        Some(endpoint) => Arc::new(HttpObjectStorage::new(
            client.clone(),
            endpoint.as_str(),
            config.storage.api_key.clone(),
        )),
        None => {
            log::warn!("STORAGE_ENDPOINT not set, images are kept in memory");
            Arc::new(MemoryObjectStorage::new())
        }
    };
    let compositor: Arc<dyn CompositingService> = match &config.compositor {
        Some(remote) => Arc::new(HttpCompositor::new(
            client.clone(),
            remote.url.as_str(),
            remote.api_key.clone(),
        )),
        None => Arc::new(LocalCompositor::new(storage.clone(), config.storage.bucket.as_str())),
    };

    let broadcaster: Arc<dyn Broadcaster> = match &config.relay {
        Some(relay) => Arc::new(RelayNotifier::start(
            RelayConfig {
                url: relay.url.clone(),
                ack_timeout: relay.ack_timeout,
                reconnect_interval: relay.reconnect_interval,
            },
            SystemCredentials::new(config.jwt_secret.as_str(), config.system_token_ttl_secs),
        )),
        None => {
            log::warn!("RELAY_URL not set, realtime broadcasts are disabled");
            Arc::new(OfflineBroadcaster)
        }
    };

    let snaps = SnapService::new(
        store,
        Arc::new(catalog),
        storage,
        compositor,
        broadcaster,
        SnapSettings {
            bucket: config.storage.bucket.clone(),
            default_countdown_secs: config.default_countdown_secs,
        },
    );
    let app = handlers::router(AppState {
        snaps: Arc::new(snaps),
        keys: AuthKeys::new(&config.jwt_secret),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("could not bind {}", config.bind_addr))?;
    log::info!("listening on http://{}", config.bind_addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
