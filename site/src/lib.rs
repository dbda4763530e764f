//! A screencast site served through the `bitserve` effect interpreter.
//!
//! Every page and webhook is a handler generic over
//! [`bitserve::Interpreter`]; [`dispatch`] picks one per request and the
//! server binary runs the result with the production executor.

pub mod assets;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod feed;
pub mod gift;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod views;

use bitserve::{AsyncTask, Reference, TaskError};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

pub use assets::Assets;
pub use catalog::{Catalog, CatalogSource, FileCatalog, StaticCatalog};
pub use collaborators::{Billing, Mailer, OAuth, Unconfigured};
pub use config::SiteConfig;
pub use dispatch::{dispatch, RequestHead};
pub use routes::Route;

/// Task name of a catalog refresh.
pub const REFRESH_CATALOG: &str = "catalog.refresh";

/// Everything handlers need besides the request: reference data and the
/// external collaborators. Cheap to clone.
#[derive(Clone)]
pub struct Site {
    catalog: Arc<Reference<Catalog>>,
    catalog_source: Arc<dyn CatalogSource>,
    pub assets: Arc<Assets>,
    pub billing: Arc<dyn Billing>,
    pub mailer: Arc<dyn Mailer>,
    pub oauth: Arc<dyn OAuth>,
    pub base_url: String,
    pub github_client_id: String,
    clock: fn() -> OffsetDateTime,
}

impl Site {
    /// A site over `catalog`, refreshed from `source`. Collaborators start
    /// out unconfigured.
    pub fn new(catalog: Catalog, source: Arc<dyn CatalogSource>) -> Self {
        Self {
            catalog: Arc::new(Reference::new(catalog)),
            catalog_source: source,
            assets: Arc::new(Assets::default()),
            billing: Arc::new(Unconfigured),
            mailer: Arc::new(Unconfigured),
            oauth: Arc::new(Unconfigured),
            base_url: "http://localhost:8080".into(),
            github_client_id: String::new(),
            clock: OffsetDateTime::now_utc,
        }
    }

    /// A site whose refreshes reload the same fixed catalog.
    pub fn with_catalog(catalog: Catalog) -> Self {
        let source = Arc::new(StaticCatalog(catalog.clone()));
        Self::new(catalog, source)
    }

    pub fn with_assets(mut self, assets: Assets) -> Self {
        self.assets = Arc::new(assets);
        self
    }

    pub fn with_billing(mut self, billing: Arc<dyn Billing>) -> Self {
        self.billing = billing;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_oauth(mut self, oauth: Arc<dyn OAuth>) -> Self {
        self.oauth = oauth;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_github_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.github_client_id = client_id.into();
        self
    }

    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// The current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.load()
    }

    pub fn now(&self) -> OffsetDateTime {
        (self.clock)()
    }

    /// Reload the catalog from its source and publish it.
    pub fn refresh_task(&self) -> AsyncTask<()> {
        let source = self.catalog_source.clone();
        let catalog = self.catalog.clone();
        AsyncTask::new(REFRESH_CATALOG, "", async move {
            let fresh = source
                .load()
                .await
                .map_err(|e| TaskError::Failed(e.to_string()))?;
            info!(
                episodes = fresh.episodes.len(),
                collections = fresh.collections.len(),
                "catalog refreshed"
            );
            catalog.replace(fresh);
            Ok(())
        })
    }
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("base_url", &self.base_url)
            .field("episodes", &self.catalog().episodes.len())
            .finish_non_exhaustive()
    }
}
