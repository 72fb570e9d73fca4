use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use secrecy::ExposeSecret;
use tgbin::Config;
use tgbin::gateway::{SessionPool, Streamer};
use tgbin::http::{AppState, router};
use tgbin::proxy::{ConnectorProber, ProxyDirectory, ProxyProber};
use tgbin::store::StoreConnector;
use tgbin::store::memory::MemoryStore;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "📦 tgbin";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    setup();
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init();

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str()).unwrap();
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> std::io::Result<()> {
    let config = Config::snapshot();

    // The wire protocol behind the store is an integration point; the binary
    // runs against the in-tree memory backend (objects live for the process
    // lifetime). A real connector plugs in here without touching the rest.
    let store = MemoryStore::new(config.bot_token.expose_secret(), config.bin_channel);
    let connector: Arc<dyn StoreConnector> = Arc::new(store.connector());

    let proxy = if config.proxy_enabled {
        let directory = ProxyDirectory::new(config.proxy_source.clone());
        let prober: Arc<dyn ProxyProber> = Arc::new(ConnectorProber::new(
            connector.clone(),
            config.bot_token.clone(),
        ));
        let found = directory.find_working(&prober).await;
        if found.is_none() {
            warn!("no working relay; falling back to direct connection");
        }
        found
    } else {
        None
    };

    let pool = Arc::new(SessionPool::new(
        connector.as_ref(),
        config.pool_size,
        config.bin_channel,
        config.bot_token.clone(),
        proxy,
    ));
    pool.start().await;

    let state = AppState {
        streamer: Arc::new(Streamer::new(pool.clone())),
        pool: pool.clone(),
    };

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("{} listening on {}", APP_NAME, config.listen_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("{} shutting down", APP_NAME);
        })
        .await?;

    pool.stop().await;
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
