use std::path::PathBuf;
use std::sync::Arc;

use crate::error::GatewayResult;
use crate::models::Settings;
use crate::proxy::broker::CredentialBroker;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::pool::AccountPool;
use crate::proxy::upstream::UpstreamClient;
use crate::proxy::SignatureCache;

/// Shared components, explicitly constructed once at startup and passed by
/// handle. No hidden singletons.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<AccountPool>,
    pub broker: Arc<CredentialBroker>,
    pub upstream: Arc<UpstreamClient>,
    pub dispatcher: Arc<Dispatcher>,
    pub settings: Settings,
}

pub async fn build_state(pool_path: Option<PathBuf>) -> GatewayResult<AppState> {
    let pool = AccountPool::initialize(pool_path).await?;
    let settings = pool.settings().await;

    let upstream = Arc::new(UpstreamClient::new(&settings));
    let broker = Arc::new(CredentialBroker::new(
        pool.clone(),
        upstream.clone(),
        settings.clone(),
    ));
    let signatures = Arc::new(SignatureCache::new(
        crate::constants::TOOL_SIGNATURE_CACHE_CAPACITY,
        crate::constants::FAMILY_CACHE_CAPACITY,
        settings.min_signature_length,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        broker.clone(),
        upstream.clone(),
        signatures,
        settings.clone(),
    ));

    Ok(AppState {
        pool,
        broker,
        upstream,
        dispatcher,
        settings,
    })
}
