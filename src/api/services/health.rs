use std::time::{Duration, Instant};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use tracing::{error, info, trace};

use crate::policy::PolicyPipeline;
use crate::storage::PolicyStoreAdapter;
use crate::utils::TimeParser;

/// 存储往返检查使用的 key
const HEALTH_PROBE_KEY: &str = "health:probe";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// 应用启动时间结构体
#[derive(Clone, Debug)]
pub struct AppStartTime {
    pub start_datetime: chrono::DateTime<chrono::Utc>,
}

impl AppStartTime {
    pub fn now() -> Self {
        Self {
            start_datetime: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStoreCheck {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime: u64,
    pub uptime_human: String,
    pub store: HealthStoreCheck,
    pub response_time_ms: u64,
}

pub struct HealthService;

impl HealthService {
    /// 写入、读回、删除一个探测 key
    async fn round_trip(adapter: &PolicyStoreAdapter) -> Result<(), String> {
        let store = adapter.store();
        let marker = chrono::Utc::now().timestamp_millis().to_string();

        store
            .put(HEALTH_PROBE_KEY, &marker, Some(Duration::from_secs(60)))
            .await
            .map_err(|e| e.to_string())?;
        let read = store
            .get(HEALTH_PROBE_KEY)
            .await
            .map_err(|e| e.to_string())?;
        store
            .delete(HEALTH_PROBE_KEY)
            .await
            .map_err(|e| e.to_string())?;

        if read.as_deref() == Some(marker.as_str()) {
            Ok(())
        } else {
            Err("round-trip value mismatch".to_string())
        }
    }

    async fn check_store(pipeline: &PolicyPipeline) -> HealthStoreCheck {
        let Some(adapter) = pipeline.adapter() else {
            return HealthStoreCheck {
                status: "unhealthy".to_string(),
                backend: "none".to_string(),
                error: Some("storage not configured".to_string()),
            };
        };

        let backend = adapter.backend_name().to_string();
        let result = match tokio::time::timeout(HEALTH_TIMEOUT, Self::round_trip(adapter)).await {
            Ok(result) => result,
            Err(_) => Err("timeout".to_string()),
        };

        match result {
            Ok(()) => {
                trace!("Store health check passed ({})", backend);
                HealthStoreCheck {
                    status: "healthy".to_string(),
                    backend,
                    error: None,
                }
            }
            Err(e) => {
                error!("Store health check failed ({}): {}", backend, e);
                HealthStoreCheck {
                    status: "unhealthy".to_string(),
                    backend,
                    error: Some(e),
                }
            }
        }
    }

    pub async fn health_check(
        pipeline: web::Data<PolicyPipeline>,
        app_start_time: web::Data<AppStartTime>,
    ) -> impl Responder {
        let start_time = Instant::now();
        trace!("Received health check request");

        let store = Self::check_store(&pipeline).await;
        let is_healthy = store.status == "healthy";

        let now = chrono::Utc::now();
        let uptime_human = TimeParser::format_duration_human(app_start_time.start_datetime, now);
        let uptime_seconds = (now - app_start_time.start_datetime).num_seconds().max(0) as u64;

        let response = HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: now.to_rfc3339(),
            uptime: uptime_seconds,
            uptime_human: uptime_human.clone(),
            store,
            response_time_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Health check completed in {:?}, status: {}, uptime: {}",
            start_time.elapsed(),
            response.status,
            uptime_human
        );

        let status = if is_healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        HttpResponse::build(status)
            .append_header(("Content-Type", "application/json; charset=utf-8"))
            .json(response)
    }

    // 活跃性检查，不触碰存储
    pub async fn liveness_check() -> impl Responder {
        trace!("Received liveness check request");
        HttpResponse::NoContent().finish()
    }
}

/// Health 路由配置
pub fn health_routes() -> actix_web::Scope {
    web::scope("")
        .route("", web::get().to(HealthService::health_check))
        .route("", web::head().to(HealthService::health_check))
        .route("/live", web::get().to(HealthService::liveness_check))
        .route("/live", web::head().to(HealthService::liveness_check))
}
