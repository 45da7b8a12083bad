use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod capture;
mod config;
mod dbus_interface;
mod engine;
mod notify;
mod records;
mod session;
mod store;
mod views;

use app::App;
use auth::{AuthContext, FirebaseIdentity, TokenSlot};
use config::{Config, StoreBackend};
use dbus_interface::{VisageTimeService, BUS_NAME, OBJECT_PATH};
use notify::Notifier;
use session::SessionCache;
use store::{FirebaseStore, MemoryStore, RealtimeStore};
use views::ViewContext;
use visage_time_core::Route;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "visage-timed starting");

    let config = Arc::new(Config::from_env());
    tracing::info!(
        camera = %config.camera_device,
        models = %config.model_dir.display(),
        store = ?config.store_backend,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config.camera_device, config.model_dir.clone())?;

    let token = TokenSlot::default();
    let store: Arc<dyn RealtimeStore> = match config.store_backend {
        StoreBackend::Firebase => {
            if config.database_url.is_empty() {
                anyhow::bail!("VISAGE_TIME_DATABASE_URL is required for the firebase store");
            }
            Arc::new(FirebaseStore::new(config.database_url.clone(), token.clone()))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let cache = SessionCache::open(&config.session_path)
        .await
        .with_context(|| format!("opening session cache {}", config.session_path.display()))?;
    let auth = Arc::new(AuthContext::new(
        Arc::new(FirebaseIdentity::new(config.api_key.clone())),
        cache,
        config.admin_emails.clone(),
        token,
    ));
    auth.restore().await;

    let mut auth_state = auth.subscribe();
    tokio::spawn(async move {
        while auth_state.changed().await.is_ok() {
            let state = auth_state.borrow_and_update().clone();
            tracing::info!(
                user = ?state.user.as_ref().map(|u| u.id.as_str()),
                loading = state.loading,
                "auth state changed"
            );
        }
    });

    let notifier = Notifier::new();
    let mut app = App::new(ViewContext {
        store,
        source: Arc::new(engine),
        auth,
        notifier: notifier.clone(),
        config,
    });
    app.navigate(Route::Dashboard.path()).await;
    tracing::info!(route = %app.route(), "initial view");
    let app = Arc::new(Mutex::new(app));

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, VisageTimeService::new(app.clone(), notifier))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, "visage-timed ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("visage-timed shutting down");
    app.lock().await.shutdown().await;

    Ok(())
}
