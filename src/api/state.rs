//! Shared application state

use std::sync::Arc;

use crate::auth::AuthGate;
use crate::config::Config;
use crate::export::{ExportJobManager, LocalDiskStorage, ObjectStorage, UrlSigner};
use crate::query::TransactionQueryService;
use crate::rate_limit::RateLimiter;
use crate::store::Repositories;
use crate::webhook::WebhookIngestor;

/// Everything a handler or middleware needs, cloned per request
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repositories: Repositories,
    pub auth: AuthGate,
    pub limiter: Arc<RateLimiter>,
    pub queries: TransactionQueryService,
    pub exports: ExportJobManager,
    pub webhooks: WebhookIngestor,
    pub storage: Arc<dyn ObjectStorage>,
    pub signer: UrlSigner,
}

impl AppState {
    /// Wire services over the given repositories with local-disk object storage
    pub fn new(config: Config, repositories: Repositories) -> Self {
        let signer = UrlSigner::new(
            &config.storage.signed_url_secret,
            config.storage.public_url.clone(),
        );
        let storage: Arc<dyn ObjectStorage> = Arc::new(LocalDiskStorage::new(
            config.storage.root.clone(),
            &config.storage.bucket,
            signer.clone(),
        ));
        Self::with_storage(config, repositories, storage, signer)
    }

    pub fn with_storage(
        config: Config,
        repositories: Repositories,
        storage: Arc<dyn ObjectStorage>,
        signer: UrlSigner,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let auth = AuthGate::new(
            repositories.partners.clone(),
            config.auth.timestamp_tolerance_secs,
        );
        let queries = TransactionQueryService::new(
            repositories.transactions.clone(),
            repositories.terminals.clone(),
            config.query.clone(),
        );
        let exports = ExportJobManager::new(
            repositories.export_jobs.clone(),
            storage.clone(),
            config.export.clone(),
            config.query.max_range_days,
            config.storage.signed_url_ttl_secs,
        );
        let webhooks = WebhookIngestor::new(
            repositories.terminals.clone(),
            repositories.transactions.clone(),
            config.webhook.razorpay_secret.clone(),
        );

        Self {
            config: Arc::new(config),
            repositories,
            auth,
            limiter,
            queries,
            exports,
            webhooks,
            storage,
            signer,
        }
    }
}
