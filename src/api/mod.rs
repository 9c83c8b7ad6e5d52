//! HTTP surface: visitor route, health, admin API

use std::sync::Arc;

use actix_web::web;

use crate::config::{AdminConfig, RoutesConfig};
use crate::policy::PolicyPipeline;
use crate::services::{Forwarder, HeaderProbe};

pub mod middleware;
pub mod render;
pub mod services;

use middleware::AdminAuth;
use services::{AppStartTime, admin_routes, health_routes, redirect_routes};

/// 每个 worker 共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub pipeline: PolicyPipeline,
    pub probe: HeaderProbe,
    pub forwarder: Arc<dyn Forwarder>,
    pub routes: RoutesConfig,
    pub admin: AdminConfig,
    pub started_at: AppStartTime,
}

/// 注册 app_data 和全部路由
///
/// 访客路由是通配的，必须最后注册。管理 token 为空时不挂载管理路由。
pub fn configure_app(state: &AppState, cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::Data::new(state.pipeline.clone()))
        .app_data(web::Data::new(state.probe.clone()))
        .app_data(web::Data::new(Arc::clone(&state.forwarder)))
        .app_data(web::Data::new(state.routes.clone()))
        .app_data(web::Data::new(state.started_at.clone()))
        .app_data(web::JsonConfig::default().limit(64 * 1024));

    cfg.service(web::scope(&state.routes.health_prefix).service(health_routes()));

    if !state.admin.token.is_empty() {
        cfg.service(
            web::scope(&state.admin.route_prefix)
                .wrap(AdminAuth::new(state.admin.token.as_str()))
                .service(admin_routes()),
        );
    }

    cfg.service(redirect_routes());
}
