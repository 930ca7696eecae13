//! HTTP handlers for object and bucket operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::object::Object,
    services::storage_service::{ListObjectsParams, ObjectStore},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

/// Query params accepted by `GET /{bucket}`.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListObjectsResponse {
    pub bucket: String,
    pub prefix: Option<String>,
    pub objects: Vec<ObjectSummary>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub etag: Option<String>,
    pub last_modified: String,
}

impl From<Object> for ObjectSummary {
    fn from(obj: Object) -> Self {
        Self {
            key: obj.key,
            size: obj.size_bytes,
            etag: obj.etag,
            last_modified: obj.last_modified.to_rfc3339(),
        }
    }
}

/// Upload an object to `/{bucket}/{*key}`.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .upload_object_stream(&bucket, &key, content_type, stream)
        .await?;

    let mut resp_headers = HeaderMap::new();
    if let Some(value) = object.etag.as_ref().map(|e| format!("\"{}\"", e)) {
        if let Ok(header_value) = HeaderValue::from_str(&value) {
            resp_headers.insert(header::ETAG, header_value);
        }
    }

    Ok((StatusCode::OK, resp_headers))
}

/// Download an object `/{bucket}/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = state.storage.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let meta = state.storage.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    set_object_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/{bucket}/{*key}`: always 204, whether or not the key existed.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_object(&bucket, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/{bucket}`: list objects, supports ?prefix=&max-keys=&continuation-token=
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    let start_after = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;

    let params = ListObjectsParams {
        prefix: q.prefix.clone(),
        start_after,
        max_keys: q.max_keys.unwrap_or(1000),
    };
    let result = state.storage.list_objects_page(&bucket, params).await?;

    Ok(Json(ListObjectsResponse {
        bucket,
        prefix: q.prefix,
        objects: result.objects.into_iter().map(ObjectSummary::from).collect(),
        is_truncated: result.is_truncated,
        next_continuation_token: result
            .next_start_after
            .as_deref()
            .map(encode_continuation_token),
    }))
}

/// PUT `/{bucket}`: create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let created = state.storage.create_bucket(&bucket).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "bucket": created.name, "location": format!("/{}", created.name) })),
    ))
}

/// DELETE `/{bucket}`: delete an empty bucket.
pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &Object) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("invalid continuation-token"))
}
