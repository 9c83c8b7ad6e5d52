use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder, web};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::api::render;
use crate::config::RoutesConfig;
use crate::policy::{AccessRequest, DispatchOutcome, PipelineOutcome, PolicyPipeline, VisitorRequest};
use crate::services::{Forwarder, HeaderProbe, HeaderSet, merge_headers};
use crate::utils::is_valid_short_code;

/// 访客可提交的查询参数
#[derive(Debug, Default, Deserialize)]
pub struct VisitorQuery {
    pub password: Option<String>,
    pub confirmed: Option<String>,
}

pub struct RedirectService;

impl RedirectService {
    pub async fn handle_redirect(
        req: HttpRequest,
        path: web::Path<String>,
        pipeline: web::Data<PolicyPipeline>,
        probe: web::Data<HeaderProbe>,
        forwarder: web::Data<Arc<dyn Forwarder>>,
        routes: web::Data<RoutesConfig>,
    ) -> HttpResponse {
        let captured_path = path.into_inner();
        let code = captured_path.trim_matches('/');

        if code.is_empty() {
            return HttpResponse::TemporaryRedirect()
                .insert_header((LOCATION, routes.default_url.as_str()))
                .finish();
        }
        if !is_valid_short_code(code) {
            trace!("Invalid short code rejected: {}", code);
            return render::error_response(&req, StatusCode::NOT_FOUND, "Link not found");
        }

        // 参数格式不对时当作没有提交
        let query = web::Query::<VisitorQuery>::from_query(req.query_string())
            .map(web::Query::into_inner)
            .unwrap_or_default();
        let peer_addr = req.peer_addr().map(|addr| addr.to_string());

        let request = VisitorRequest {
            code,
            headers: req.headers(),
            peer_addr: peer_addr.as_deref(),
            access: AccessRequest::new(query.password.as_deref(), query.confirmed.as_deref()),
        };

        let outcome = match pipeline.handle(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return render::error_response(&req, e.http_status(), e.public_message());
            }
        };

        match outcome {
            PipelineOutcome::NotFound => {
                render::error_response(&req, StatusCode::NOT_FOUND, "Link not found")
            }
            PipelineOutcome::LegacyRedirect { target } => HttpResponse::MovedPermanently()
                .insert_header((LOCATION, target))
                .finish(),
            PipelineOutcome::Denied(denial) => {
                render::error_response(&req, denial.status, &denial.reason)
            }
            PipelineOutcome::MockNode { payload, .. } => HttpResponse::Ok()
                .insert_header((CONTENT_TYPE, "text/plain; charset=utf-8"))
                .insert_header((CACHE_CONTROL, "no-store"))
                .body(payload),
            PipelineOutcome::Dispatched { outcome, assessment } => {
                trace!(
                    "Dispatching '{}' (score {})",
                    code, assessment.risk_score
                );
                Self::respond(&req, code, outcome, &probe, forwarder.get_ref().as_ref()).await
            }
        }
    }

    async fn respond(
        req: &HttpRequest,
        code: &str,
        outcome: DispatchOutcome,
        probe: &HeaderProbe,
        forwarder: &dyn Forwarder,
    ) -> HttpResponse {
        match outcome {
            DispatchOutcome::PasswordPrompt { error } => {
                render::password_page(code, error.as_deref())
            }
            DispatchOutcome::WarningPrompt { target } => render::warning_page(code, &target),
            DispatchOutcome::Iframe { target, title } => {
                render::iframe_page(&target, title.as_deref())
            }
            DispatchOutcome::Redirect { target, headers } => {
                // 探测失败只会得到空集合，不影响重定向
                let probed = probe.probe(&target).await;
                let merged = merge_headers(&probed, &headers);
                let mut builder = HttpResponse::TemporaryRedirect();
                Self::apply_headers(&mut builder, &merged);
                builder.insert_header((LOCATION, target)).finish()
            }
            DispatchOutcome::Proxy { target } => match forwarder.forward(&target).await {
                Ok(forwarded) => {
                    let status =
                        StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
                    let mut builder = HttpResponse::build(status);
                    Self::apply_headers(&mut builder, &forwarded.headers);
                    if let Some(content_type) = forwarded.content_type.as_deref() {
                        builder.insert_header((CONTENT_TYPE, content_type));
                    }
                    debug!("Proxied '{}' with status {}", code, status);
                    builder.body(forwarded.body)
                }
                Err(e) => {
                    warn!("Proxy forward for '{}' failed: {}", code, e);
                    render::error_response(req, e.http_status(), e.public_message())
                }
            },
        }
    }

    /// 只写入合法的头，非法名称或取值直接跳过
    fn apply_headers(builder: &mut HttpResponseBuilder, headers: &HeaderSet) {
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    builder.insert_header((name, value));
                }
                _ => warn!("Skipping invalid response header '{}'", name),
            }
        }
    }
}

/// 访客路由，必须最后注册
pub fn redirect_routes() -> actix_web::Scope {
    web::scope("")
        .route("/{path}*", web::get().to(RedirectService::handle_redirect))
        .route("/{path}*", web::head().to(RedirectService::handle_redirect))
}
