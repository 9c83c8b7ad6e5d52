use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::api::services::AppStartTime;
use crate::config::StaticConfig;
use crate::policy::PolicyPipeline;
use crate::services::{Forwarder, HeaderProbe, HttpForwarder, WebhookNotifier};
use crate::storage::StorageFactory;

/// 准备服务器启动所需的共享状态
///
/// 存储后端、策略管线以及探测、转发、告警几个协作者。
pub async fn prepare_server_startup(config: &StaticConfig) -> Result<AppState> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    let store = StorageFactory::create(&config.store)
        .await
        .context("Failed to create policy store")?;
    if store.is_none() {
        warn!("No policy store bound: every visitor request will answer 500");
    }

    let notifier = Arc::new(WebhookNotifier::new(config.alert.webhook_timeout_ms));
    let pipeline = PolicyPipeline::new(store, &config.policy).with_notifier(notifier);

    let probe = HeaderProbe::new(&config.probe);
    if !probe.is_enabled() {
        info!("Header probe disabled");
    }
    let forwarder: Arc<dyn Forwarder> = Arc::new(HttpForwarder::new(&config.proxy));

    if config.admin.token.is_empty() {
        info!("Admin API is disabled (admin.token not set)");
    } else {
        info!("Admin API available at: {}", config.admin.route_prefix);
    }

    debug!("Pre-startup completed in {:?}", start_time.elapsed());

    Ok(AppState {
        pipeline,
        probe,
        forwarder,
        routes: config.routes.clone(),
        admin: config.admin.clone(),
        started_at: AppStartTime::now(),
    })
}
