//! Admin API：链接记录维护、访问统计、封禁管理
//!
//! 所有路由都挂在 [`crate::api::middleware::AdminAuth`] 之后。

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, trace, warn};

use crate::api::render::json_error;
use crate::errors::{Result, ShortgateError};
use crate::policy::PolicyPipeline;
use crate::storage::models::canonicalize_record_keys;
use crate::storage::{
    BlockEntry, BlockKind, LinkRecord, PolicyStoreAdapter, StoredLink, VisitHistoryEntry,
};
use crate::utils::password::process_update_password;
use crate::utils::{TimeParser, is_valid_short_code, validate_target_url};

/// 不允许通过请求体直接写入的字段
const PROTECTED_FIELDS: &[&str] = &["passwordHash", "password", "shortKey", "code"];

/// 封禁请求体
#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub subject: String,
    pub kind: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// 相对时间（如 `1d`）或 RFC3339
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub code: String,
    pub current_visits: i64,
    pub total_visits: i64,
    pub last_visit_at: Option<DateTime<Utc>>,
    pub visit_history: Vec<VisitHistoryEntry>,
    pub known_devices: usize,
}

fn success_response<T: Serialize>(status: StatusCode, data: T) -> HttpResponse {
    HttpResponse::build(status)
        .append_header(("Content-Type", "application/json; charset=utf-8"))
        .json(json!({ "success": true, "data": data }))
}

fn error_from(err: &ShortgateError) -> HttpResponse {
    if err.http_status().is_server_error() {
        error!("Admin API error: {}", err.format_simple());
    } else {
        trace!("Admin API rejected request: {}", err.format_simple());
    }
    json_error(err.http_status(), err.public_message())
}

fn api_result<T: Serialize>(status: StatusCode, result: Result<T>) -> HttpResponse {
    match result {
        Ok(data) => success_response(status, data),
        Err(e) => error_from(&e),
    }
}

fn require_adapter(pipeline: &PolicyPipeline) -> Result<&PolicyStoreAdapter> {
    pipeline
        .adapter()
        .ok_or_else(|| ShortgateError::storage_not_configured("Policy store is not configured"))
}

/// 对外展示的记录：去掉密码哈希，只保留是否设置了密码
fn record_view(record: &LinkRecord) -> Result<Value> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.remove("passwordHash");
        map.insert(
            "hasPassword".to_string(),
            Value::Bool(record.password_hash().is_some()),
        );
    }
    Ok(value)
}

/// 把请求体叠加到现有记录上，得到新记录
///
/// `password` 为明文，会被哈希；空字符串表示移除密码。
pub fn merge_link_update(
    code: &str,
    existing: Option<LinkRecord>,
    update: Value,
    now: DateTime<Utc>,
) -> Result<LinkRecord> {
    let Value::Object(mut patch) = update else {
        return Err(ShortgateError::validation("Request body must be a JSON object"));
    };

    let password = match patch.get("password") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ShortgateError::validation("password must be a string")),
    };
    for field in PROTECTED_FIELDS {
        patch.remove(*field);
    }
    canonicalize_record_keys(&mut patch);

    let base = existing.unwrap_or_else(|| LinkRecord {
        short_key: code.to_string(),
        created_at: Some(now),
        ..Default::default()
    });
    let existing_hash = base.password_hash.clone();

    let mut merged = match serde_json::to_value(&base)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        merged.insert(key, value);
    }

    let mut record: LinkRecord = serde_json::from_value(Value::Object(merged))
        .map_err(|e| ShortgateError::validation(format!("Invalid link record: {}", e)))?;

    record.short_key = code.to_string();
    record.target_url = validate_target_url(&record.target_url)?.to_string();
    record.password_hash = process_update_password(password.as_deref(), existing_hash)?;
    record.created_at = record.created_at.or(Some(now));
    record.updated_at = Some(now);
    Ok(record)
}

pub struct AdminService;

impl AdminService {
    /// PUT /links/{code}
    pub async fn upsert_link(
        path: web::Path<String>,
        body: web::Json<Value>,
        pipeline: web::Data<PolicyPipeline>,
    ) -> impl Responder {
        let code = path.into_inner();
        trace!("Admin API: upsert link '{}'", code);
        api_result(
            StatusCode::OK,
            Self::save_link(&pipeline, &code, body.into_inner()).await,
        )
    }

    /// GET /links/{code}
    pub async fn get_link(
        path: web::Path<String>,
        pipeline: web::Data<PolicyPipeline>,
    ) -> impl Responder {
        let code = path.into_inner();
        api_result(StatusCode::OK, Self::load_link_view(&pipeline, &code).await)
    }

    /// GET /links/{code}/stats
    pub async fn get_link_stats(
        path: web::Path<String>,
        pipeline: web::Data<PolicyPipeline>,
    ) -> impl Responder {
        let code = path.into_inner();
        api_result(StatusCode::OK, Self::load_stats(&pipeline, &code).await)
    }

    /// GET /blocks
    pub async fn list_blocks(pipeline: web::Data<PolicyPipeline>) -> impl Responder {
        let result = match require_adapter(&pipeline) {
            Ok(adapter) => adapter.list_blocks().await,
            Err(e) => Err(e),
        };
        api_result(StatusCode::OK, result)
    }

    /// POST /blocks
    pub async fn create_block(
        body: web::Json<BlockRequest>,
        pipeline: web::Data<PolicyPipeline>,
    ) -> impl Responder {
        api_result(
            StatusCode::CREATED,
            Self::store_block(&pipeline, body.into_inner()).await,
        )
    }

    /// DELETE /blocks/{kind}/{subject}
    pub async fn delete_block(
        path: web::Path<(String, String)>,
        pipeline: web::Data<PolicyPipeline>,
    ) -> impl Responder {
        let (kind, subject) = path.into_inner();
        api_result(
            StatusCode::OK,
            Self::drop_block(&pipeline, &kind, &subject).await,
        )
    }

    async fn save_link(pipeline: &PolicyPipeline, code: &str, update: Value) -> Result<Value> {
        let adapter = require_adapter(pipeline)?;
        if !is_valid_short_code(code) {
            return Err(ShortgateError::validation(format!(
                "Invalid short code '{}'. Only alphanumeric, underscore, hyphen, dot, and slash allowed.",
                code
            )));
        }
        let existing = match adapter.load_link(code).await? {
            Some(StoredLink::Record(record)) => Some(*record),
            // 旧格式记录升级为完整记录
            Some(StoredLink::Legacy(target)) => Some(LinkRecord::new(code, target)),
            None => None,
        };
        let created = existing.is_none();
        let record = merge_link_update(code, existing, update, Utc::now())?;
        adapter.save_link(&record).await?;
        info!(
            "Admin API: {} link '{}' -> {}",
            if created { "created" } else { "updated" },
            code,
            record.target_url
        );
        record_view(&record)
    }

    async fn load_link_view(pipeline: &PolicyPipeline, code: &str) -> Result<Value> {
        let adapter = require_adapter(pipeline)?;
        match adapter.load_link(code).await? {
            Some(StoredLink::Record(record)) => record_view(&record),
            Some(StoredLink::Legacy(target)) => Ok(json!({
                "shortKey": code,
                "targetUrl": target,
                "legacy": true,
            })),
            None => Err(ShortgateError::not_found(format!("Link not found: {}", code))),
        }
    }

    async fn load_stats(pipeline: &PolicyPipeline, code: &str) -> Result<LinkStats> {
        let adapter = require_adapter(pipeline)?;
        let record = match adapter.load_link(code).await? {
            Some(StoredLink::Record(record)) => *record,
            Some(StoredLink::Legacy(target)) => LinkRecord::new(code, target),
            None => {
                return Err(ShortgateError::not_found(format!(
                    "Link not found: {}",
                    code
                )));
            }
        };
        let known_devices = adapter.known_device_count(code).await?;
        Ok(LinkStats {
            code: code.to_string(),
            current_visits: record.current_visits,
            total_visits: record.total_visits,
            last_visit_at: record.last_visit_at,
            visit_history: record.visit_history,
            known_devices,
        })
    }

    async fn store_block(pipeline: &PolicyPipeline, request: BlockRequest) -> Result<BlockEntry> {
        let adapter = require_adapter(pipeline)?;
        let entry = Self::build_block(request, Utc::now())?;
        adapter.put_block(&entry).await?;
        info!(
            "Admin API: blocked {} '{}' until {:?}",
            entry.kind.as_ref(),
            entry.subject_id,
            entry.expires_at
        );
        Ok(entry)
    }

    async fn drop_block(pipeline: &PolicyPipeline, kind: &str, subject: &str) -> Result<Value> {
        let adapter = require_adapter(pipeline)?;
        let kind: BlockKind = kind.parse().map_err(ShortgateError::validation)?;
        adapter.remove_block(kind, subject).await?;
        info!("Admin API: unblocked {} '{}'", kind.as_ref(), subject);
        Ok(json!({ "kind": kind, "subject": subject }))
    }

    fn build_block(request: BlockRequest, now: DateTime<Utc>) -> Result<BlockEntry> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(ShortgateError::validation("subject cannot be empty"));
        }
        let kind: BlockKind = request.kind.parse().map_err(ShortgateError::validation)?;

        let expires_at = match request.expires.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let at = TimeParser::parse_expire_time_at(raw, now)?;
                if at <= now {
                    warn!("Admin API: rejected block with past expiry {}", at);
                    return Err(ShortgateError::validation("expires must be in the future"));
                }
                Some(at)
            }
        };

        Ok(BlockEntry {
            subject_id: subject.to_string(),
            kind,
            reason: request.reason.unwrap_or_default().trim().to_string(),
            blocked_at: now,
            expires_at,
        })
    }
}

/// Admin 路由配置
pub fn admin_routes() -> actix_web::Scope {
    web::scope("")
        .route("/links/{code}", web::put().to(AdminService::upsert_link))
        .route("/links/{code}", web::get().to(AdminService::get_link))
        .route(
            "/links/{code}/stats",
            web::get().to(AdminService::get_link_stats),
        )
        .route("/blocks", web::get().to(AdminService::list_blocks))
        .route("/blocks", web::post().to(AdminService::create_block))
        .route(
            "/blocks/{kind}/{subject}",
            web::delete().to(AdminService::delete_block),
        )
}
