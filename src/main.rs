use std::sync::Arc;

use anyhow::Context;
use axum::Router;

use helios_portal::api::create_client;
use helios_portal::auth::{AuthOrchestrator, spawn_connection_watcher};
use helios_portal::config::PortalConfig;
use helios_portal::error;
use helios_portal::onboarding::{StepExecutor, default_effects};
use helios_portal::routes::{AppState, session_routes};
use helios_portal::session::SessionStore;
use helios_portal::storage::FileTokenStore;
use helios_portal::wallet::{ReadOnlyWallet, WalletProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PortalConfig::from_env();
    config.validate()?;

    eprintln!("Helios portal v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", config.api_url);
    eprintln!(
        "   Chain: {} ({})",
        config.chain.chain_name,
        config.chain.chain_id_hex()
    );
    eprintln!("   Token store: {}", config.token_path.display());
    eprintln!("   Session API: http://0.0.0.0:{}/api/session", config.http_port);
    eprintln!("   Session WS: ws://0.0.0.0:{}/ws/session", config.http_port);

    let app = boot(&config).await?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("binding session server on port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Session server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire the API client, token store, session and wallet together, restore
/// any stored session, and build the router.
async fn boot(config: &PortalConfig) -> error::Result<Router> {
    let api = create_client(config)?;

    let wallet: Arc<dyn WalletProvider> = Arc::new(ReadOnlyWallet::new(config.wallet.clone()));
    match wallet.address() {
        Some(address) => eprintln!("   Wallet: {address} (watch-only)"),
        None => eprintln!("   Wallet: none (set HELIOS_WALLET to restore a session)"),
    }

    let tokens = Arc::new(FileTokenStore::new(config.token_path.clone()));
    let session = SessionStore::new();
    let auth = Arc::new(AuthOrchestrator::new(
        Arc::clone(&api),
        Arc::clone(&wallet),
        tokens,
        Arc::clone(&session),
    ));
    if let Some(url) = config.landing_url.as_deref() {
        match auth.set_landing_url(url) {
            Some(code) => eprintln!("   Referral: {code}"),
            None => tracing::warn!(url, "Landing URL carries no referral code"),
        }
    }

    match auth.restore_session().await {
        Ok(outcome) => eprintln!("   Session: {outcome:?}"),
        Err(e) => {
            tracing::warn!(error = %e, "Could not restore session");
            eprintln!("   Session: not restored ({})", e.user_message());
        }
    }

    let executor = Arc::new(StepExecutor::new(
        api,
        session,
        default_effects(wallet, config.chain.clone()),
    ));

    // Runs for the life of the process.
    let (_watcher, _shutdown) = spawn_connection_watcher(Arc::clone(&auth), config.connection_debounce);

    Ok(session_routes(AppState::new(auth, executor)))
}
