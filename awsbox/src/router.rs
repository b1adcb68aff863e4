//! HTTP router for awsbox services
//!
//! The JSON services hang off `POST /` demultiplexed by the
//! `X-Amz-Target` service prefix; everything else falls through to the
//! S3 path-style routes. Disabled services and unknown targets answer
//! 404 with no body, which AWS SDKs tolerate from local tools.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use awsbox_core::{ArnGenerator, RequestId};
use awsbox_kinesis::{handlers as kinesis_handlers, KinesisState, KinesisStorage};
use awsbox_kms::{handlers as kms_handlers, KmsState, KmsStorage};
use awsbox_s3::{handlers as s3_handlers, S3State, S3Storage};

/// Hard cap on request bodies.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Which services to run, and with what defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub enable_kinesis: bool,
    pub kinesis_default_retention: chrono::Duration,
    pub enable_kms: bool,
    pub enable_s3: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable_kinesis: true,
            kinesis_default_retention: chrono::Duration::hours(24),
            enable_kms: true,
            enable_s3: true,
        }
    }
}

/// Service state for the main router
pub struct AppState {
    pub kinesis: Option<Arc<KinesisState>>,
    pub kms: Option<Arc<KmsState>>,
    pub s3: Option<Arc<S3State>>,
}

impl AppState {
    pub fn new(arn: ArnGenerator, config: ServiceConfig) -> Self {
        let kinesis = config.enable_kinesis.then(|| {
            Arc::new(KinesisState {
                storage: Arc::new(KinesisStorage::new(
                    arn.clone(),
                    config.kinesis_default_retention,
                )),
            })
        });
        let kms = config.enable_kms.then(|| {
            Arc::new(KmsState {
                storage: Arc::new(KmsStorage::new(arn.clone())),
            })
        });
        let s3 = config.enable_s3.then(|| {
            Arc::new(S3State {
                storage: Arc::new(S3Storage::new()),
                owner: arn.account_id.clone(),
            })
        });
        Self { kinesis, kms, s3 }
    }
}

/// Middleware to stamp x-amzn-RequestId on all responses
async fn add_request_id(request: axum::http::Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "x-amzn-RequestId",
        RequestId::new()
            .as_str()
            .parse()
            .expect("uuid is a valid header value"),
    );
    response
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/", any(handle_root))
        .route("/:bucket", any(handle_bucket))
        .route("/:bucket/*key", any(handle_object))
        .layer(middleware::from_fn(add_request_id))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

async fn health_check() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"status": "running", "services": {"kinesis": "available", "kms": "available", "s3": "available"}}"#,
        ))
        .expect("valid response")
}

/// Demultiplex `POST /` on the X-Amz-Target header; no target means the
/// request is S3 ListBuckets.
async fn handle_root(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(target) = headers.get("x-amz-target").and_then(|v| v.to_str().ok()) {
        let prefix = target.split('.').next().unwrap_or(target);
        info!(target = %target, "JSON target request");

        return match prefix {
            kinesis_handlers::SERVICE => match &state.kinesis {
                Some(kinesis) => {
                    kinesis_handlers::handle_request(State(kinesis.clone()), headers, body).await
                }
                None => not_found(),
            },
            kms_handlers::SERVICE => match &state.kms {
                Some(kms) => {
                    kms_handlers::handle_request(State(kms.clone()), headers, body).await
                }
                None => not_found(),
            },
            _ => not_found(),
        };
    }

    match &state.s3 {
        Some(s3) => s3_handlers::handle_root(State(s3.clone()), method).await,
        None => not_found(),
    }
}

async fn handle_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    method: Method,
    Query(query): Query<s3_handlers::S3Query>,
) -> Response {
    match &state.s3 {
        Some(s3) => {
            s3_handlers::handle_bucket(State(s3.clone()), Path(bucket), method, Query(query)).await
        }
        None => not_found(),
    }
}

async fn handle_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    Query(query): Query<s3_handlers::S3Query>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match &state.s3 {
        Some(s3) => {
            s3_handlers::handle_object(
                State(s3.clone()),
                Path((bucket, key)),
                method,
                Query(query),
                headers,
                body,
            )
            .await
        }
        None => not_found(),
    }
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("valid response")
}
