use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{FieldKey, NewTemplate, Session, UploadedFile};
use super::error::{ApiError, ApiResult};
use super::middleware::auth::session;
use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub title: Option<String>,
    pub filename: Option<String>,
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlQuery {
    pub filename: Option<String>,
    pub content_type: String,
}

/// Resolves the caller and charges one request against their quota.
fn authorize(req: &HttpRequest, state: &ApiState) -> ApiResult<Session> {
    let session = session(req)?;
    if state.rate_limiter.check_key(&session.user_id).is_err() {
        return Err(ApiError::too_many_requests());
    }
    Ok(session)
}

/// Upload an invoice document; the raw body is the file
pub async fn upload_invoice(
    req: HttpRequest,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let query = query.into_inner();
    let file = UploadedFile::new(query.filename, content_type, body);
    let invoice = state
        .lifecycle
        .upload(&session, file, query.title, query.template_id, None)
        .await?;

    Ok(HttpResponse::Created().json(invoice))
}

pub async fn list_invoices(req: HttpRequest, state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let invoices = state.lifecycle.list(&session).await?;

    Ok(HttpResponse::Ok().json(json!({
        "invoices": invoices
    })))
}

pub async fn get_invoice(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let detail = state.lifecycle.get(&session, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn delete_invoice(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    state.lifecycle.delete(&session, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn analyze_invoice(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let outcome = state
        .lifecycle
        .analyze(&session, path.into_inner(), None)
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Body is a `{field: value}` map of confirmed values
pub async fn validate_invoice(
    req: HttpRequest,
    path: web::Path<Uuid>,
    values: web::Json<BTreeMap<FieldKey, String>>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let detail = state
        .lifecycle
        .validate(&session, path.into_inner(), values.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn export_invoice(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let result = state.lifecycle.export(&session, path.into_inner()).await?;

    if result.success {
        Ok(HttpResponse::Ok().json(result))
    } else {
        Ok(HttpResponse::BadGateway().json(result))
    }
}

pub async fn invoice_file(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let id = path.into_inner();

    match state.lifecycle.file_url(&session, id).await? {
        Some(url) => Ok(HttpResponse::Ok().json(json!({ "url": url }))),
        None => Err(ApiError::not_found(format!("invoice {} has no stored file", id))),
    }
}

pub async fn upload_url(
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<UploadUrlQuery>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let query = query.into_inner();
    let url = state
        .lifecycle
        .signed_upload_url(&session, path.into_inner(), query.filename, &query.content_type)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "url": url,
        "expires_in": state.config.storage.signed_url_ttl_seconds
    })))
}

pub async fn sage_preview(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let payload = state.lifecycle.sage_preview(&session, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payload))
}

pub async fn stats(req: HttpRequest, state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let stats = state.lifecycle.stats(&session).await?;
    Ok(HttpResponse::Ok().json(stats))
}

// Template endpoints

pub async fn list_templates(req: HttpRequest, state: web::Data<ApiState>) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let templates = state.lifecycle.list_templates(&session).await?;

    Ok(HttpResponse::Ok().json(json!({
        "templates": templates
    })))
}

pub async fn create_template(
    req: HttpRequest,
    body: web::Json<NewTemplate>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let template = state
        .lifecycle
        .create_template(&session, body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(template))
}

pub async fn get_template(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<ApiState>,
) -> ApiResult<HttpResponse> {
    let session = authorize(&req, &state)?;
    let template = state
        .lifecycle
        .get_template(&session, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(template))
}
