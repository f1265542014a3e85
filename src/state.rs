use std::{future::Future, sync::Arc, time::Instant};

use tokio::sync::Semaphore;

use crate::{
    auth::AuthService, config::Config, plans::PriceMap, processing::ProcessingClient,
    rate_limit::InMemoryRateLimiter, store::CreditStore, stripe_api::StripeApi,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn CreditStore>,
    pub auth: AuthService,
    pub stripe: StripeApi,
    pub processing: ProcessingClient,
    pub price_map: PriceMap,
    pub processing_semaphore: Arc<Semaphore>,
    pub api_limiter: Arc<InMemoryRateLimiter>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn CreditStore>,
        auth: AuthService,
        stripe: StripeApi,
        processing: ProcessingClient,
    ) -> Self {
        let price_map = PriceMap::from_config(&config);
        Self {
            processing_semaphore: Arc::new(Semaphore::new(config.processing_concurrency)),
            api_limiter: Arc::new(InMemoryRateLimiter::new(
                std::time::Duration::from_secs(15 * 60),
                100,
            )),
            config: Arc::new(config),
            store,
            auth,
            stripe,
            processing,
            price_map,
        }
    }

    /// Runs a provider call under the processing semaphore so a burst of
    /// requests cannot fan out to the paid APIs unbounded.
    pub async fn run_processing_job<F, Fut, T>(
        &self,
        task_name: &str,
        task: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let enqueued_at = Instant::now();
        let permit = self
            .processing_semaphore
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("processing queue closed"))?;
        let started_at = Instant::now();
        let wait_ms = started_at.duration_since(enqueued_at).as_millis();

        let result = task().await;

        let run_ms = Instant::now().duration_since(started_at).as_millis();
        drop(permit);

        if self.config.log_processing_timings {
            tracing::info!(task = task_name, wait_ms, run_ms, "processing timing");
        }

        result
    }
}
