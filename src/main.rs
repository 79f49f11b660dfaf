use std::{sync::Arc, time::Duration};

// [library] Error handling crate - `Result<T>` is `Result<T, anyhow::Error>`
use anyhow::Result;

// [library] HTTP utilities from axum web framework
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};

use campus_idp::{
    auth::{AuthenticationFlow, LogSmsSender},
    db::{create_pool, KeyStore, PgStore},
    ephemeral::PgEphemeralStore,
    keygen::generate_signing_key,
    oauth::{KeyManager, OidcService, OidcStores},
    security::Kek,
    web::{create_app_router, AppState},
    Config,
};

// [library] Tower ecosystem - middleware and service abstractions for HTTP servers
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// [library] Structured logging framework
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// [business] Expired ephemeral rows are invisible to reads; this only reclaims space
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // [library] Environment-based log filtering - RUST_LOG overrides the default
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("campus_idp=info,tower_http=debug")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting campus identity provider");

    let config = Arc::new(Config::from_env()?);
    let bind_address = config.bind_address();

    info!("Connecting to database...");
    let db = create_pool(config.database_url()).await?;
    info!("Database connection established and migrations applied");

    // [business] Both stores share the pool; components receive them by injection
    let store = Arc::new(PgStore::new(db.clone()));
    let ephemeral = Arc::new(PgEphemeralStore::new(db));

    // [security] KEK is derived once; the raw secret never leaves Config
    let kek = Arc::new(Kek::derive(config.key_encryption_secret()));
    let keys = Arc::new(KeyManager::new(
        store.clone(),
        kek.clone(),
        config.signing_key_cache_ttl(),
    ));

    // [business] First boot: without an active key nothing can be signed
    if store.active_signing_key().await?.is_none() {
        warn!("No active signing key found; generating one");
        keys.rotate(generate_signing_key(&kek, None)?).await?;
    }

    let purge_store = ephemeral.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match purge_store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!("Purged {} expired ephemeral entries", purged),
                Err(e) => warn!("Ephemeral purge failed: {:#}", e),
            }
        }
    });

    let oidc = Arc::new(OidcService::new(
        config.clone(),
        OidcStores {
            clients: store.clone(),
            users: store.clone(),
            refresh_tokens: store.clone(),
            ephemeral: ephemeral.clone(),
        },
        keys,
    ));
    let auth = Arc::new(AuthenticationFlow::new(
        config.clone(),
        store.clone(),
        store,
        ephemeral,
        Arc::new(LogSmsSender),
    ));

    // [security] Credentialed CORS needs explicit origins, never a wildcard
    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let app = create_app_router(AppState::new(config.clone(), oidc, auth))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
                .allow_credentials(true),
        )
        .layer(TraceLayer::new_for_http());

    info!("Server starting on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
