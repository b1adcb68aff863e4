//! S3 HTTP request handlers
//!
//! Path-style routing: `/` lists buckets, `/:bucket` is bucket-level,
//! `/:bucket/*key` is object-level. Sub-resources (`?tagging`,
//! `?uploads`, `?uploadId`) select the operation within a method.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::storage::{S3Error, S3Storage};
use crate::xml;

/// Shared state for S3 handlers
pub struct S3State {
    pub storage: Arc<S3Storage>,
    /// Account id reported as the bucket owner.
    pub owner: String,
}

/// Query parameters selecting S3 sub-resources
#[derive(Debug, Deserialize, Default)]
pub struct S3Query {
    pub prefix: Option<String>,
    pub tagging: Option<String>,
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<i32>,
}

/// Handle `/`: ListBuckets
pub async fn handle_root(State(state): State<Arc<S3State>>, method: Method) -> Response {
    match method {
        Method::GET => xml_response(
            StatusCode::OK,
            xml::format_list_buckets(&state.owner, &state.storage.list_buckets()),
        ),
        _ => method_not_allowed(),
    }
}

/// Handle `/:bucket`
pub async fn handle_bucket(
    State(state): State<Arc<S3State>>,
    Path(bucket): Path<String>,
    method: Method,
    Query(query): Query<S3Query>,
) -> Response {
    info!(bucket = %bucket, method = %method, "S3 bucket request");

    match method {
        Method::PUT => match state.storage.create_bucket(&bucket) {
            Ok(()) => Response::builder()
                .status(StatusCode::OK)
                .header(header::LOCATION, format!("/{}", bucket))
                .body(Body::empty())
                .expect("valid response"),
            Err(e) => error_response(&e, &bucket),
        },
        Method::HEAD => {
            if state.storage.bucket_exists(&bucket) {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::empty())
                    .expect("valid response")
            } else {
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::empty())
                    .expect("valid response")
            }
        }
        Method::DELETE => match state.storage.delete_bucket(&bucket) {
            Ok(()) => no_content(),
            Err(e) => error_response(&e, &bucket),
        },
        Method::GET => {
            let prefix = query.prefix.unwrap_or_default();
            match state.storage.list_objects(&bucket, &prefix) {
                Ok(objects) => {
                    let entries: Vec<(String, String, usize)> = objects
                        .into_iter()
                        .map(|(key, object)| (key, object.etag(), object.data.len()))
                        .collect();
                    xml_response(
                        StatusCode::OK,
                        xml::format_list_objects(&bucket, &prefix, &entries),
                    )
                }
                Err(e) => error_response(&e, &bucket),
            }
        }
        _ => method_not_allowed(),
    }
}

/// Handle `/:bucket/*key`
pub async fn handle_object(
    State(state): State<Arc<S3State>>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    Query(query): Query<S3Query>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    info!(bucket = %bucket, key = %key, method = %method, "S3 object request");

    match method {
        Method::PUT if query.upload_id.is_some() => {
            upload_part(&state, &bucket, &key, &query, body)
        }
        Method::PUT if headers.contains_key("x-amz-copy-source") => {
            copy_object(&state, &bucket, &key, &headers)
        }
        Method::PUT if query.tagging.is_some() => put_tagging(&state, &bucket, &key, &body),
        Method::PUT => put_object(&state, &bucket, &key, &headers, body),
        Method::GET if query.tagging.is_some() => get_tagging(&state, &bucket, &key),
        Method::GET => get_object(&state, &bucket, &key),
        Method::HEAD => head_object(&state, &bucket, &key),
        Method::DELETE if query.tagging.is_some() => delete_tagging(&state, &bucket, &key),
        Method::DELETE if query.upload_id.is_some() => {
            abort_multipart(&state, query.upload_id.as_deref().unwrap_or_default())
        }
        Method::DELETE => delete_object(&state, &bucket, &key),
        Method::POST if query.uploads.is_some() => {
            create_multipart(&state, &bucket, &key, &headers)
        }
        Method::POST if query.upload_id.is_some() => {
            complete_multipart(&state, &bucket, &key, &query, &body)
        }
        _ => method_not_allowed(),
    }
}

// === Object operations ===

fn put_object(
    state: &S3State,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .storage
        .put_object(bucket, key, body.to_vec(), content_type(headers))
    {
        Ok(etag) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{}\"", etag))
            .body(Body::empty())
            .expect("valid response"),
        Err(e) => error_response(&e, key),
    }
}

fn get_object(state: &S3State, bucket: &str, key: &str) -> Response {
    match state.storage.get_object(bucket, key) {
        Ok(object) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{}\"", object.etag()))
            .header(
                header::CONTENT_TYPE,
                object
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )
            .header(header::CONTENT_LENGTH, object.data.len())
            .body(Body::from(object.data))
            .expect("valid response"),
        Err(e) => error_response(&e, key),
    }
}

fn head_object(state: &S3State, bucket: &str, key: &str) -> Response {
    match state.storage.get_object(bucket, key) {
        Ok(object) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{}\"", object.etag()))
            .header(header::CONTENT_LENGTH, object.data.len())
            .body(Body::empty())
            .expect("valid response"),
        Err(_) => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("valid response"),
    }
}

fn delete_object(state: &S3State, bucket: &str, key: &str) -> Response {
    match state.storage.delete_object(bucket, key) {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, key),
    }
}

fn copy_object(state: &S3State, bucket: &str, key: &str, headers: &HeaderMap) -> Response {
    let source = headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    // "/source-bucket/path/to/key"
    let source = source.trim_start_matches('/');
    let Some((source_bucket, source_key)) = source.split_once('/') else {
        return error_response(
            &S3Error::InvalidArgument("x-amz-copy-source must name a bucket and key".to_string()),
            source,
        );
    };

    match state
        .storage
        .copy_object(source_bucket, source_key, bucket, key, content_type(headers))
    {
        Ok(etag) => xml_response(
            StatusCode::OK,
            xml::format_copy_object(&etag, &chrono::Utc::now().to_rfc3339()),
        ),
        Err(e) => error_response(&e, source_key),
    }
}

// === Tagging ===

fn get_tagging(state: &S3State, bucket: &str, key: &str) -> Response {
    match state.storage.get_object_tags(bucket, key) {
        Ok(tags) => xml_response(StatusCode::OK, xml::format_tagging(&tags)),
        Err(e) => error_response(&e, key),
    }
}

fn put_tagging(state: &S3State, bucket: &str, key: &str, body: &Bytes) -> Response {
    let body = String::from_utf8_lossy(body);
    let tags: Vec<(String, String)> = xml::get_elements(&body, "Tag")
        .iter()
        .filter_map(|tag| {
            Some((
                xml::get_value(tag, "Key")?,
                xml::get_value(tag, "Value")?,
            ))
        })
        .collect();

    match state.storage.put_object_tags(bucket, key, tags) {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .expect("valid response"),
        Err(e) => error_response(&e, key),
    }
}

fn delete_tagging(state: &S3State, bucket: &str, key: &str) -> Response {
    match state.storage.delete_object_tags(bucket, key) {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, key),
    }
}

// === Multipart ===

fn create_multipart(state: &S3State, bucket: &str, key: &str, headers: &HeaderMap) -> Response {
    match state
        .storage
        .create_multipart_upload(bucket, key, content_type(headers))
    {
        Ok(upload_id) => xml_response(
            StatusCode::OK,
            xml::format_initiate_multipart_upload(bucket, key, &upload_id),
        ),
        Err(e) => error_response(&e, key),
    }
}

fn upload_part(
    state: &S3State,
    bucket: &str,
    key: &str,
    query: &S3Query,
    body: Bytes,
) -> Response {
    let upload_id = query.upload_id.as_deref().unwrap_or_default();
    let Some(part_number) = query.part_number else {
        return error_response(
            &S3Error::InvalidArgument("partNumber is required".to_string()),
            key,
        );
    };

    match state
        .storage
        .upload_part(bucket, key, upload_id, part_number, body.to_vec())
    {
        Ok(etag) => Response::builder()
            .status(StatusCode::OK)
            .header(header::ETAG, format!("\"{}\"", etag))
            .body(Body::empty())
            .expect("valid response"),
        Err(e) => error_response(&e, key),
    }
}

fn complete_multipart(
    state: &S3State,
    bucket: &str,
    key: &str,
    query: &S3Query,
    body: &Bytes,
) -> Response {
    let upload_id = query.upload_id.as_deref().unwrap_or_default();
    let body = String::from_utf8_lossy(body);
    let parts: Vec<(i32, String)> = xml::get_elements(&body, "Part")
        .iter()
        .filter_map(|part| {
            let number = xml::get_value(part, "PartNumber")?.parse().ok()?;
            let etag = xml::get_value(part, "ETag")?.replace('"', "").replace("&quot;", "");
            Some((number, etag))
        })
        .collect();

    match state
        .storage
        .complete_multipart_upload(bucket, key, upload_id, parts)
    {
        Ok(completed) => xml_response(
            StatusCode::OK,
            xml::format_complete_multipart_upload(
                &format!("/{}/{}", completed.bucket, completed.key),
                &completed.bucket,
                &completed.key,
                &completed.etag,
            ),
        ),
        Err(e) => error_response(&e, key),
    }
}

fn abort_multipart(state: &S3State, upload_id: &str) -> Response {
    match state.storage.abort_multipart_upload(upload_id) {
        Ok(()) => no_content(),
        Err(e) => error_response(&e, upload_id),
    }
}

// === Helpers ===

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn xml_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .expect("valid response")
}

fn error_response(error: &S3Error, resource: &str) -> Response {
    xml_response(
        StatusCode::from_u16(error.http_status()).expect("valid status"),
        xml::format_error(error.code(), &error.to_string(), resource),
    )
}

fn no_content() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("valid response")
}

fn method_not_allowed() -> Response {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .body(Body::empty())
        .expect("valid response")
}
