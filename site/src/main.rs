use anyhow::{Context, Result};
use argh::FromArgs;
use bitserve::database::MemoryPool;
use bitserve::ProductionExecutor;
use bitserve_site::catalog::{Catalog, CatalogSource, FileCatalog, StaticCatalog};
use bitserve_site::{server, Assets, Site, SiteConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serve the screencast site.
#[derive(FromArgs)]
struct Options {
    /// path to a TOML configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// address to listen on, overriding the configuration
    #[argh(option)]
    address: Option<SocketAddr>,

    /// directory static files are served from, overriding the configuration
    #[argh(option)]
    static_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = argh::from_env::<Options>();

    let mut config = SiteConfig::load(options.config.as_deref()).context("failed to load configuration")?;
    config
        .apply_env(|name| std::env::var(name).ok())
        .context("invalid environment override")?;
    if let Some(address) = options.address {
        config.address = address;
    }
    if let Some(static_root) = options.static_root {
        config.static_root = static_root;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let source: Arc<dyn CatalogSource> = match &config.catalog_path {
        Some(path) => Arc::new(FileCatalog::new(path)),
        None => {
            warn!("no catalog configured, serving an empty site");
            Arc::new(StaticCatalog(Catalog::default()))
        }
    };
    let catalog = source.load().await.context("failed to load catalog")?;
    info!(
        episodes = catalog.episodes.len(),
        collections = catalog.collections.len(),
        plans = catalog.plans.len(),
        "catalog loaded"
    );

    let assets = config
        .asset_manifest
        .as_deref()
        .map(Assets::load)
        .unwrap_or_default();
    let site = Site::new(catalog, source)
        .with_assets(assets)
        .with_base_url(&config.base_url)
        .with_github_client_id(&config.github_client_id);

    let pool = MemoryPool::new(config.max_connections, config.acquire_timeout());
    match &config.data_path {
        Some(path) if path.exists() => {
            pool.restore(path)
                .with_context(|| format!("failed to restore tables from {}", path.display()))?;
            info!(path = %path.display(), "tables restored");
        }
        Some(_) => {}
        None => warn!("no data path configured, users and sessions will not survive a restart"),
    }
    let mut executor = ProductionExecutor::new(Arc::new(pool.clone()), &config.static_root);
    if let Some(timeout) = config.task_timeout() {
        executor = executor.with_task_timeout(timeout);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    };
    let served = server::serve(site, executor, config.address, shutdown).await;
    if let Some(path) = &config.data_path {
        pool.save(path)
            .with_context(|| format!("failed to save tables to {}", path.display()))?;
        info!(path = %path.display(), "tables saved");
    }
    served.with_context(|| format!("server on {} failed", config.address))
}
