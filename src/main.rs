use alz_predictor::{
    artifacts::DirArtifactStore,
    auth::{AuthService, PasswordHashing, SqliteAccountStore},
    features::feature_names,
    InferenceHandle, ServiceConfig,
};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ServiceConfig::from_env()?;
    tracing::info!("config: {:?}", cfg);

    // Artifacts load once; a failure leaves /predict answering 503.
    let store = DirArtifactStore::new(&cfg.artifact_dir);
    tracing::info!("artifact store root: {}", store.root().display());
    let inference =
        InferenceHandle::load(&store, &cfg.scaler_artifact, &cfg.model_artifact, cfg.model_format);
    if inference.is_ready() {
        let names: Vec<&str> = feature_names().collect();
        tracing::info!("loaded model; feat_list[{}]: {:?}", names.len(), names);
    } else {
        tracing::warn!("starting without a stage model; /predict/ will answer 503");
    }

    let accounts = SqliteAccountStore::open(&cfg.database_path)?;
    let auth = AuthService::new(Arc::new(accounts), PasswordHashing::new(cfg.pbkdf2_rounds))
        .context("failed to initialise password hashing")?;

    let state = alz_predictor::AppState::new(inference, auth, cfg.stats_path.clone());
    let app = alz_predictor::app(state, &cfg.cors_origins);

    let addr = cfg.socket_addr();
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
