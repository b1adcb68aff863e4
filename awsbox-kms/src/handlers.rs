//! HTTP handlers for KMS
//!
//! Requests arrive as AWS JSON 1.1 bodies routed by the full
//! `X-Amz-Target` value, e.g. `TrentService.Encrypt`.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use awsbox_core::{AwsError, ErrorCode};

use crate::storage::{EncryptionContext, KeyMetadata, KmsError, KmsStorage};

/// Target prefix for the KMS JSON protocol.
pub const SERVICE: &str = "TrentService";

const ENCRYPTION_ALGORITHM: &str = "SYMMETRIC_DEFAULT";

/// Shared state for KMS handlers
pub struct KmsState {
    pub storage: Arc<KmsStorage>,
}

/// Handle a KMS request based on the X-Amz-Target header
pub async fn handle_request(
    State(state): State<Arc<KmsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(target = %target, "KMS request");

    let storage = &state.storage;
    match target {
        "TrentService.CreateKey" => create_key(storage, &body),
        "TrentService.DescribeKey" => describe_key(storage, &body),
        "TrentService.ListKeys" => list_keys(storage),
        "TrentService.ListAliases" => list_aliases(storage),
        "TrentService.CreateAlias" => create_alias(storage, &body),
        "TrentService.UpdateAlias" => update_alias(storage, &body),
        "TrentService.DeleteAlias" => delete_alias(storage, &body),
        "TrentService.EnableKey" => enable_key(storage, &body),
        "TrentService.DisableKey" => disable_key(storage, &body),
        "TrentService.ScheduleKeyDeletion" => schedule_key_deletion(storage, &body),
        "TrentService.CancelKeyDeletion" => cancel_key_deletion(storage, &body),
        "TrentService.EnableKeyRotation" => enable_key_rotation(storage, &body),
        "TrentService.DisableKeyRotation" => disable_key_rotation(storage, &body),
        "TrentService.GetKeyRotationStatus" => get_key_rotation_status(storage, &body),
        "TrentService.RotateKeyOnDemand" => rotate_key_on_demand(storage, &body),
        "TrentService.Encrypt" => encrypt(storage, &body),
        "TrentService.Decrypt" => decrypt(storage, &body),
        "TrentService.ReEncrypt" => re_encrypt(storage, &body),
        "TrentService.GenerateDataKey" => generate_data_key(storage, &body, true),
        "TrentService.GenerateDataKeyWithoutPlaintext" => {
            generate_data_key(storage, &body, false)
        }
        "TrentService.GenerateRandom" => generate_random(storage, &body),
        "TrentService.TagResource" => tag_resource(storage, &body),
        "TrentService.UntagResource" => untag_resource(storage, &body),
        "TrentService.ListResourceTags" => list_resource_tags(storage, &body),
        _ => {
            warn!(target = %target, "Unknown KMS operation");
            not_found()
        }
    }
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    tag_key: String,
    tag_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyRequest {
    description: Option<String>,
    key_usage: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyIdRequest {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AliasRequest {
    alias_name: String,
    target_key_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduleKeyDeletionRequest {
    key_id: String,
    pending_window_in_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptRequest {
    key_id: String,
    plaintext: String,
    #[serde(default)]
    encryption_context: EncryptionContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptResponse {
    ciphertext_blob: String,
    key_id: String,
    encryption_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[allow(dead_code)]
struct DecryptRequest {
    ciphertext_blob: String,
    #[serde(default)]
    encryption_context: EncryptionContext,
    /// Accepted for wire compatibility; the blob itself names the key.
    key_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptResponse {
    plaintext: String,
    key_id: String,
    encryption_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReEncryptRequest {
    ciphertext_blob: String,
    #[serde(default)]
    source_encryption_context: EncryptionContext,
    destination_key_id: String,
    #[serde(default)]
    destination_encryption_context: EncryptionContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReEncryptResponse {
    ciphertext_blob: String,
    source_key_id: String,
    key_id: String,
    source_encryption_algorithm: &'static str,
    destination_encryption_algorithm: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateDataKeyRequest {
    key_id: String,
    key_spec: Option<String>,
    number_of_bytes: Option<usize>,
    #[serde(default)]
    encryption_context: EncryptionContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateDataKeyResponse {
    ciphertext_blob: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plaintext: Option<String>,
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GenerateRandomRequest {
    number_of_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagResourceRequest {
    key_id: String,
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UntagResourceRequest {
    key_id: String,
    tag_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct KeyMetadataResponse {
    key_id: String,
    arn: String,
    key_state: String,
    description: String,
    key_usage: String,
    origin: String,
    enabled: bool,
    key_manager: &'static str,
    creation_date: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletion_date: Option<f64>,
}

// === Handlers ===

fn create_key(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: CreateKeyRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let tags: HashMap<String, String> = req
        .tags
        .into_iter()
        .map(|t| (t.tag_key, t.tag_value))
        .collect();
    match storage.create_key(req.description, req.key_usage, tags) {
        Ok(key) => json_response(&serde_json::json!({
            "KeyMetadata": metadata_response(&key),
        })),
        Err(e) => engine_error(&e),
    }
}

fn describe_key(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.describe_key(&req.key_id) {
        Ok(key) => json_response(&serde_json::json!({
            "KeyMetadata": metadata_response(&key),
        })),
        Err(e) => engine_error(&e),
    }
}

fn list_keys(storage: &KmsStorage) -> Response {
    let keys: Vec<serde_json::Value> = storage
        .list_keys()
        .into_iter()
        .map(|(key_id, key_arn)| {
            serde_json::json!({
                "KeyId": key_id,
                "KeyArn": key_arn,
            })
        })
        .collect();
    json_response(&serde_json::json!({
        "Keys": keys,
        "Truncated": false,
    }))
}

fn list_aliases(storage: &KmsStorage) -> Response {
    let aliases: Vec<serde_json::Value> = storage
        .list_aliases()
        .into_iter()
        .map(|a| {
            serde_json::json!({
                "AliasName": a.name,
                "AliasArn": a.arn,
                "TargetKeyId": a.target_key_id,
            })
        })
        .collect();
    json_response(&serde_json::json!({
        "Aliases": aliases,
        "Truncated": false,
    }))
}

fn create_alias(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: AliasRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let target = match req.target_key_id.as_deref() {
        Some(t) => t,
        None => {
            return error_response(ErrorCode::MissingParameter, "TargetKeyId is required");
        }
    };
    match storage.create_alias(&req.alias_name, target) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn update_alias(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: AliasRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let target = match req.target_key_id.as_deref() {
        Some(t) => t,
        None => {
            return error_response(ErrorCode::MissingParameter, "TargetKeyId is required");
        }
    };
    match storage.update_alias(&req.alias_name, target) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn delete_alias(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: AliasRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.delete_alias(&req.alias_name) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn enable_key(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.enable_key(&req.key_id) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn disable_key(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.disable_key(&req.key_id) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn schedule_key_deletion(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: ScheduleKeyDeletionRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.schedule_key_deletion(&req.key_id, req.pending_window_in_days) {
        Ok((key_arn, deletion_date)) => json_response(&serde_json::json!({
            "KeyId": key_arn,
            "DeletionDate": deletion_date.timestamp() as f64,
        })),
        Err(e) => engine_error(&e),
    }
}

fn cancel_key_deletion(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.cancel_key_deletion(&req.key_id) {
        Ok(key_arn) => json_response(&serde_json::json!({ "KeyId": key_arn })),
        Err(e) => engine_error(&e),
    }
}

fn enable_key_rotation(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.enable_rotation(&req.key_id) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn disable_key_rotation(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.disable_rotation(&req.key_id) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn get_key_rotation_status(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.rotation_status(&req.key_id) {
        Ok(enabled) => json_response(&serde_json::json!({ "KeyRotationEnabled": enabled })),
        Err(e) => engine_error(&e),
    }
}

fn rotate_key_on_demand(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.rotate_key(&req.key_id) {
        Ok(key_arn) => json_response(&serde_json::json!({ "KeyId": key_arn })),
        Err(e) => engine_error(&e),
    }
}

fn encrypt(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: EncryptRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let plaintext = match decode_b64(&req.plaintext, "Plaintext") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match storage.encrypt(&req.key_id, &plaintext, &req.encryption_context) {
        Ok(result) => json_response(&EncryptResponse {
            ciphertext_blob: BASE64.encode(&result.ciphertext),
            key_id: result.key_arn,
            encryption_algorithm: ENCRYPTION_ALGORITHM,
        }),
        Err(e) => engine_error(&e),
    }
}

fn decrypt(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: DecryptRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let blob = match decode_b64(&req.ciphertext_blob, "CiphertextBlob") {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match storage.decrypt(&blob, &req.encryption_context) {
        Ok(result) => json_response(&DecryptResponse {
            plaintext: BASE64.encode(&result.plaintext),
            key_id: result.key_arn,
            encryption_algorithm: ENCRYPTION_ALGORITHM,
        }),
        Err(e) => engine_error(&e),
    }
}

fn re_encrypt(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: ReEncryptRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let blob = match decode_b64(&req.ciphertext_blob, "CiphertextBlob") {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match storage.re_encrypt(
        &blob,
        &req.source_encryption_context,
        &req.destination_key_id,
        &req.destination_encryption_context,
    ) {
        Ok((result, source_key_arn)) => json_response(&ReEncryptResponse {
            ciphertext_blob: BASE64.encode(&result.ciphertext),
            source_key_id: source_key_arn,
            key_id: result.key_arn,
            source_encryption_algorithm: ENCRYPTION_ALGORITHM,
            destination_encryption_algorithm: ENCRYPTION_ALGORITHM,
        }),
        Err(e) => engine_error(&e),
    }
}

fn generate_data_key(storage: &KmsStorage, body: &Bytes, include_plaintext: bool) -> Response {
    let req: GenerateDataKeyRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let number_of_bytes = match (req.key_spec.as_deref(), req.number_of_bytes) {
        (Some(_), Some(_)) => {
            return error_response(
                ErrorCode::InvalidArgumentException,
                "Specify either KeySpec or NumberOfBytes, not both",
            )
        }
        (Some("AES_256"), None) => 32,
        (Some("AES_128"), None) => 16,
        (Some(other), None) => {
            return error_response(
                ErrorCode::InvalidArgumentException,
                &format!("Unsupported KeySpec: {}", other),
            )
        }
        (None, Some(n)) => n,
        (None, None) => {
            return error_response(
                ErrorCode::MissingParameter,
                "Specify KeySpec or NumberOfBytes",
            )
        }
    };

    match storage.generate_data_key(&req.key_id, number_of_bytes, &req.encryption_context) {
        Ok(result) => json_response(&GenerateDataKeyResponse {
            ciphertext_blob: BASE64.encode(&result.ciphertext),
            plaintext: include_plaintext.then(|| BASE64.encode(&result.plaintext_key)),
            key_id: result.key_arn,
        }),
        Err(e) => engine_error(&e),
    }
}

fn generate_random(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: GenerateRandomRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.generate_random(req.number_of_bytes) {
        Ok(bytes) => json_response(&serde_json::json!({
            "Plaintext": BASE64.encode(&bytes),
        })),
        Err(e) => engine_error(&e),
    }
}

fn tag_resource(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: TagResourceRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let tags: HashMap<String, String> = req
        .tags
        .into_iter()
        .map(|t| (t.tag_key, t.tag_value))
        .collect();
    match storage.tag_key(&req.key_id, tags) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn untag_resource(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: UntagResourceRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.untag_key(&req.key_id, &req.tag_keys) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn list_resource_tags(storage: &KmsStorage, body: &Bytes) -> Response {
    let req: KeyIdRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.list_tags(&req.key_id) {
        Ok(tags) => {
            let tags: Vec<serde_json::Value> = tags
                .into_iter()
                .map(|(k, v)| serde_json::json!({ "TagKey": k, "TagValue": v }))
                .collect();
            json_response(&serde_json::json!({
                "Tags": tags,
                "Truncated": false,
            }))
        }
        Err(e) => engine_error(&e),
    }
}

// === Helpers ===

fn metadata_response(key: &KeyMetadata) -> KeyMetadataResponse {
    KeyMetadataResponse {
        key_id: key.key_id.clone(),
        arn: key.arn.clone(),
        key_state: key.state.as_str().to_string(),
        description: key.description.clone(),
        key_usage: key.key_usage.clone(),
        origin: key.origin.clone(),
        enabled: key.state == crate::storage::KeyState::Enabled,
        key_manager: "CUSTOMER",
        creation_date: key.created_at.timestamp() as f64,
        deletion_date: key.deletion_date.map(|d| d.timestamp() as f64),
    }
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        let message = e.to_string();
        let code = if message.starts_with("missing field") {
            ErrorCode::MissingParameter
        } else {
            ErrorCode::ValidationException
        };
        error_response(code, &message)
    })
}

fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>, Response> {
    BASE64.decode(value).map_err(|_| {
        error_response(
            ErrorCode::ValidationException,
            &format!("{} is not valid base64", field),
        )
    })
}

fn json_response<T: Serialize>(body: &T) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-amz-json-1.1")
        .body(Body::from(
            serde_json::to_string(body).expect("response serializes"),
        ))
        .expect("valid response")
}

fn empty_response() -> Response {
    json_response(&serde_json::json!({}))
}

fn error_response(code: ErrorCode, message: &str) -> Response {
    let err = AwsError::new(code, message);
    Response::builder()
        .status(StatusCode::from_u16(code.http_status()).expect("valid status"))
        .header(header::CONTENT_TYPE, "application/x-amz-json-1.1")
        .body(Body::from(err.to_json(SERVICE)))
        .expect("valid response")
}

fn engine_error(err: &KmsError) -> Response {
    error_response(err.code(), &err.to_string())
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("valid response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use awsbox_core::ArnGenerator;

    fn state() -> Arc<KmsState> {
        Arc::new(KmsState {
            storage: Arc::new(KmsStorage::new(ArnGenerator::default())),
        })
    }

    fn target(name: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-target", name.parse().unwrap());
        headers
    }

    async fn call(state: &Arc<KmsState>, op: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = handle_request(
            State(state.clone()),
            target(&format!("TrentService.{}", op)),
            Bytes::from(body.to_string()),
        )
        .await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_over_the_wire() {
        let state = state();
        let (_, created) = call(&state, "CreateKey", serde_json::json!({})).await;
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let (status, encrypted) = call(
            &state,
            "Encrypt",
            serde_json::json!({
                "KeyId": key_id,
                "Plaintext": BASE64.encode(b"hello"),
                "EncryptionContext": {"u": "1"},
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, decrypted) = call(
            &state,
            "Decrypt",
            serde_json::json!({
                "CiphertextBlob": encrypted["CiphertextBlob"],
                "EncryptionContext": {"u": "1"},
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            decrypted["Plaintext"].as_str().unwrap(),
            BASE64.encode(b"hello")
        );
        assert_eq!(decrypted["KeyId"], encrypted["KeyId"]);

        // Mismatched context is an InvalidCiphertextException on the wire.
        let (status, error) = call(
            &state,
            "Decrypt",
            serde_json::json!({
                "CiphertextBlob": encrypted["CiphertextBlob"],
                "EncryptionContext": {"u": "2"},
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error["__type"], "TrentService#InvalidCiphertextException");
    }

    #[tokio::test]
    async fn test_unknown_target_is_404() {
        let response = handle_request(
            State(state()),
            target("TrentService.Nope"),
            Bytes::from("{}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_generate_data_key_requires_exactly_one_size() {
        let state = state();
        let (_, created) = call(&state, "CreateKey", serde_json::json!({})).await;
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let (status, _) = call(
            &state,
            "GenerateDataKey",
            serde_json::json!({"KeyId": key_id, "KeySpec": "AES_256", "NumberOfBytes": 32}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, result) = call(
            &state,
            "GenerateDataKey",
            serde_json::json!({"KeyId": key_id, "KeySpec": "AES_256"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let plaintext = BASE64
            .decode(result["Plaintext"].as_str().unwrap())
            .unwrap();
        assert_eq!(plaintext.len(), 32);
    }

    #[tokio::test]
    async fn test_generate_data_key_without_plaintext_omits_it() {
        let state = state();
        let (_, created) = call(&state, "CreateKey", serde_json::json!({})).await;
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let (status, result) = call(
            &state,
            "GenerateDataKeyWithoutPlaintext",
            serde_json::json!({"KeyId": key_id, "KeySpec": "AES_256"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(result.get("Plaintext").is_none());
        assert!(result.get("CiphertextBlob").is_some());
    }
}
