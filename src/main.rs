use std::{collections::HashSet, env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;

use dtf_api_server::{
    auth::AuthService,
    build_router,
    config::Config,
    processing::ProcessingClient,
    state::AppState,
    store::{CreditStore, MemoryStore, SupabaseStore},
    stripe_api::StripeApi,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded_env_files = load_env_files()?;
    init_tracing();
    if loaded_env_files.is_empty() {
        tracing::warn!("No .env or .env.local file found. Using process environment only.");
    } else {
        let files = loaded_env_files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(files = %files, "Loaded environment files");
    }

    let config = Config::from_env()?;

    if config.stripe_secret_key.is_none() {
        tracing::warn!(
            "STRIPE_SECRET_KEY is not set. Stripe functionality will not work until it is provided."
        );
    }
    if config.supabase_jwt_secret.is_none() {
        tracing::warn!("SUPABASE_JWT_SECRET is not set. Authenticated routes will reject all requests.");
    }

    let store: Arc<dyn CreditStore> = match (
        config.supabase_url.as_deref(),
        config.supabase_service_role_key.as_deref(),
    ) {
        (Some(url), Some(key)) => Arc::new(SupabaseStore::new(url.to_string(), key)?),
        _ => {
            tracing::warn!(
                "SUPABASE_URL/SUPABASE_SERVICE_ROLE_KEY are not set. Falling back to the in-memory store; data will not survive a restart."
            );
            Arc::new(MemoryStore::new())
        }
    };

    let auth = AuthService::new(config.supabase_jwt_secret.as_deref());
    let stripe = StripeApi::new(
        config.stripe_secret_key.clone(),
        config.stripe_webhook_secret.clone(),
    )?;
    let processing = ProcessingClient::from_config(&config)?;

    let state = AppState::new(config.clone(), store, auth, stripe, processing);

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if let Some((cert_path, key_path)) = valid_tls_paths(&config) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS certificate/key")?;

        tracing::info!(
            port = config.port,
            "TLS configuration loaded. Running in HTTPS mode."
        );

        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .context("HTTPS server failed")?;
    } else {
        tracing::info!(port = config.port, "Running in HTTP mode.");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind TCP listener")?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("HTTP server failed")?;
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_env_files() -> anyhow::Result<Vec<PathBuf>> {
    let mut roots = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    if let Ok(executable_path) = env::current_exe() {
        if let Some(executable_dir) = executable_path.parent() {
            roots.push(executable_dir.to_path_buf());
        }
    }
    roots.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    let mut seen_roots = HashSet::new();
    let mut loaded = Vec::new();

    for root in roots {
        let key = root.to_string_lossy().to_string();
        if !seen_roots.insert(key) {
            continue;
        }

        for filename in [".env", ".env.local"] {
            let path = root.join(filename);
            if path.is_file() {
                dotenvy::from_path(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                loaded.push(path);
            }
        }
    }

    Ok(loaded)
}

fn valid_tls_paths(config: &Config) -> Option<(String, String)> {
    let cert_path = config
        .tls_cert_path
        .as_ref()
        .map(|path| path.to_string_lossy().to_string())?;
    let key_path = config
        .tls_key_path
        .as_ref()
        .map(|path| path.to_string_lossy().to_string())?;

    let cert_exists = std::path::Path::new(&cert_path).exists();
    let key_exists = std::path::Path::new(&key_path).exists();

    if cert_exists && key_exists {
        Some((cert_path, key_path))
    } else {
        if !cert_exists {
            tracing::warn!(path = %cert_path, "TLS certificate not found, falling back to HTTP");
        }
        if !key_exists {
            tracing::warn!(path = %key_path, "TLS key not found, falling back to HTTP");
        }
        None
    }
}
