//! HTTP handlers for Kinesis
//!
//! Requests arrive as AWS JSON 1.1 bodies routed by the full
//! `X-Amz-Target` value, e.g. `Kinesis_20131202.PutRecord`.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use awsbox_core::{AwsError, ErrorCode};

use crate::storage::{
    ConsumerInfo, IteratorPosition, KinesisError, KinesisStorage, PutRecordsEntry, ShardSummary,
    StreamDescription,
};

/// Target prefix for the Kinesis JSON protocol.
pub const SERVICE: &str = "Kinesis_20131202";

/// Shared state for Kinesis handlers
pub struct KinesisState {
    pub storage: Arc<KinesisStorage>,
}

/// Handle a Kinesis request based on the X-Amz-Target header
pub async fn handle_request(
    State(state): State<Arc<KinesisState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(target = %target, "Kinesis request");

    let storage = &state.storage;
    match target {
        "Kinesis_20131202.CreateStream" => create_stream(storage, &body),
        "Kinesis_20131202.DeleteStream" => delete_stream(storage, &body),
        "Kinesis_20131202.DescribeStream" => describe_stream(storage, &body),
        "Kinesis_20131202.DescribeStreamSummary" => describe_stream_summary(storage, &body),
        "Kinesis_20131202.ListStreams" => list_streams(storage),
        "Kinesis_20131202.ListShards" => list_shards(storage, &body),
        "Kinesis_20131202.IncreaseStreamRetentionPeriod" => {
            change_retention(storage, &body, true)
        }
        "Kinesis_20131202.DecreaseStreamRetentionPeriod" => {
            change_retention(storage, &body, false)
        }
        "Kinesis_20131202.PutRecord" => put_record(storage, &body),
        "Kinesis_20131202.PutRecords" => put_records(storage, &body),
        "Kinesis_20131202.GetShardIterator" => get_shard_iterator(storage, &body),
        "Kinesis_20131202.GetRecords" => get_records(storage, &body),
        "Kinesis_20131202.SplitShard" => split_shard(storage, &body),
        "Kinesis_20131202.MergeShards" => merge_shards(storage, &body),
        "Kinesis_20131202.StartStreamEncryption" => start_stream_encryption(storage, &body),
        "Kinesis_20131202.StopStreamEncryption" => stop_stream_encryption(storage, &body),
        "Kinesis_20131202.AddTagsToStream" => add_tags(storage, &body),
        "Kinesis_20131202.ListTagsForStream" => list_tags(storage, &body),
        "Kinesis_20131202.RemoveTagsFromStream" => remove_tags(storage, &body),
        "Kinesis_20131202.RegisterStreamConsumer" => register_consumer(storage, &body),
        "Kinesis_20131202.DeregisterStreamConsumer" => deregister_consumer(storage, &body),
        "Kinesis_20131202.DescribeStreamConsumer" => describe_consumer(storage, &body),
        "Kinesis_20131202.ListStreamConsumers" => list_consumers(storage, &body),
        _ => {
            warn!(target = %target, "Unknown Kinesis operation");
            not_found()
        }
    }
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateStreamRequest {
    stream_name: String,
    #[serde(default = "default_shard_count")]
    shard_count: u64,
}

fn default_shard_count() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamNameRequest {
    stream_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RetentionRequest {
    stream_name: String,
    retention_period_hours: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordRequest {
    stream_name: String,
    data: String,
    partition_key: String,
    explicit_hash_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordResponse {
    shard_id: String,
    sequence_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequest {
    stream_name: String,
    records: Vec<PutRecordsRequestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequestEntry {
    data: String,
    partition_key: String,
    explicit_hash_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsResponse {
    failed_record_count: usize,
    records: Vec<PutRecordsResultEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsResultEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    shard_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorRequest {
    stream_name: String,
    shard_id: String,
    shard_iterator_type: String,
    starting_sequence_number: Option<String>,
    timestamp: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetShardIteratorResponse {
    shard_iterator: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsRequest {
    shard_iterator: String,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsResponse {
    records: Vec<RecordResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_shard_iterator: Option<String>,
    millis_behind_latest: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecordResponse {
    sequence_number: String,
    approximate_arrival_timestamp: f64,
    data: String,
    partition_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SplitShardRequest {
    stream_name: String,
    shard_to_split: String,
    new_starting_hash_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MergeShardsRequest {
    stream_name: String,
    shard_to_merge: String,
    adjacent_shard_to_merge: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartStreamEncryptionRequest {
    stream_name: String,
    encryption_type: String,
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddTagsRequest {
    stream_name: String,
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoveTagsRequest {
    stream_name: String,
    tag_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TagResponse {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterConsumerRequest {
    #[serde(rename = "StreamARN")]
    stream_arn: String,
    consumer_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsumerRefRequest {
    #[serde(rename = "StreamARN")]
    stream_arn: Option<String>,
    consumer_name: Option<String>,
    #[serde(rename = "ConsumerARN")]
    consumer_arn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListConsumersRequest {
    #[serde(rename = "StreamARN")]
    stream_arn: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConsumerResponse {
    consumer_name: String,
    #[serde(rename = "ConsumerARN")]
    consumer_arn: String,
    consumer_status: String,
    consumer_creation_timestamp: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HashKeyRange {
    starting_hash_key: String,
    ending_hash_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SequenceNumberRange {
    starting_sequence_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ending_sequence_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ShardResponse {
    shard_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_shard_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    adjacent_parent_shard_id: Option<String>,
    hash_key_range: HashKeyRange,
    sequence_number_range: SequenceNumberRange,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDescriptionResponse {
    stream_name: String,
    #[serde(rename = "StreamARN")]
    stream_arn: String,
    stream_status: String,
    stream_creation_timestamp: f64,
    retention_period_hours: i64,
    encryption_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<String>,
    shards: Vec<ShardResponse>,
    has_more_shards: bool,
}

// === Handlers ===

fn create_stream(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: CreateStreamRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.create_stream(&req.stream_name, req.shard_count) {
        Ok(_) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn delete_stream(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.delete_stream(&req.stream_name) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn describe_stream(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.describe_stream(&req.stream_name) {
        Ok(description) => json_response(&serde_json::json!({
            "StreamDescription": stream_description_response(&description),
        })),
        Err(e) => engine_error(&e),
    }
}

fn describe_stream_summary(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.describe_stream_summary(&req.stream_name) {
        Ok(summary) => json_response(&serde_json::json!({
            "StreamDescriptionSummary": {
                "StreamName": summary.name,
                "StreamARN": summary.arn,
                "StreamStatus": summary.status.as_str(),
                "StreamCreationTimestamp": summary.created_at.timestamp() as f64,
                "RetentionPeriodHours": summary.retention_hours,
                "EncryptionType": encryption_type(summary.kms_key_id.as_deref()),
                "KeyId": summary.kms_key_id,
                "OpenShardCount": summary.open_shard_count,
                "ConsumerCount": summary.consumer_count,
            },
        })),
        Err(e) => engine_error(&e),
    }
}

fn list_streams(storage: &KinesisStorage) -> Response {
    json_response(&serde_json::json!({
        "StreamNames": storage.list_streams(),
        "HasMoreStreams": false,
    }))
}

fn list_shards(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.list_shards(&req.stream_name) {
        Ok(shards) => json_response(&serde_json::json!({
            "Shards": shards.iter().map(shard_response).collect::<Vec<_>>(),
        })),
        Err(e) => engine_error(&e),
    }
}

fn change_retention(storage: &KinesisStorage, body: &Bytes, increase: bool) -> Response {
    let req: RetentionRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = if increase {
        storage.increase_retention(&req.stream_name, req.retention_period_hours)
    } else {
        storage.decrease_retention(&req.stream_name, req.retention_period_hours)
    };
    match result {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn put_record(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: PutRecordRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let data = match decode_data(&req.data) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let explicit_hash_key = match parse_hash_key(req.explicit_hash_key.as_deref()) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    match storage.put_record(&req.stream_name, &req.partition_key, data, explicit_hash_key) {
        Ok(result) => json_response(&PutRecordResponse {
            shard_id: result.shard_id,
            sequence_number: result.sequence_number.to_string(),
        }),
        Err(e) => engine_error(&e),
    }
}

fn put_records(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: PutRecordsRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let mut entries = Vec::with_capacity(req.records.len());
    for record in &req.records {
        let data = match decode_data(&record.data) {
            Ok(d) => d,
            Err(resp) => return resp,
        };
        let explicit_hash_key = match parse_hash_key(record.explicit_hash_key.as_deref()) {
            Ok(h) => h,
            Err(resp) => return resp,
        };
        entries.push(PutRecordsEntry {
            data,
            partition_key: record.partition_key.clone(),
            explicit_hash_key,
        });
    }

    match storage.put_records(&req.stream_name, entries) {
        Ok(results) => {
            let failed_record_count = results.iter().filter(|r| r.is_err()).count();
            let records = results
                .into_iter()
                .map(|r| match r {
                    Ok(ok) => PutRecordsResultEntry {
                        shard_id: Some(ok.shard_id),
                        sequence_number: Some(ok.sequence_number.to_string()),
                        error_code: None,
                        error_message: None,
                    },
                    Err(e) => PutRecordsResultEntry {
                        shard_id: None,
                        sequence_number: None,
                        error_code: Some(e.code().as_str().to_string()),
                        error_message: Some(e.to_string()),
                    },
                })
                .collect();
            json_response(&PutRecordsResponse {
                failed_record_count,
                records,
            })
        }
        Err(e) => engine_error(&e),
    }
}

fn get_shard_iterator(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: GetShardIteratorRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let position = match req.shard_iterator_type.as_str() {
        "TRIM_HORIZON" => IteratorPosition::TrimHorizon,
        "LATEST" => IteratorPosition::Latest,
        "AT_SEQUENCE_NUMBER" | "AFTER_SEQUENCE_NUMBER" => {
            let seq = match &req.starting_sequence_number {
                Some(s) => match s.parse::<u128>() {
                    Ok(n) => n,
                    Err(_) => {
                        return error_response(
                            ErrorCode::InvalidArgumentException,
                            "StartingSequenceNumber is not a valid sequence number",
                        )
                    }
                },
                None => {
                    return error_response(
                        ErrorCode::MissingParameter,
                        "StartingSequenceNumber is required for this iterator type",
                    )
                }
            };
            if req.shard_iterator_type == "AT_SEQUENCE_NUMBER" {
                IteratorPosition::AtSequenceNumber(seq)
            } else {
                IteratorPosition::AfterSequenceNumber(seq)
            }
        }
        "AT_TIMESTAMP" => match req.timestamp {
            Some(t) => IteratorPosition::AtTimestamp(timestamp_from_epoch(t)),
            None => {
                return error_response(
                    ErrorCode::MissingParameter,
                    "Timestamp is required for AT_TIMESTAMP",
                )
            }
        },
        other => {
            return error_response(
                ErrorCode::InvalidArgumentException,
                &format!("Unknown ShardIteratorType: {}", other),
            )
        }
    };

    match storage.get_shard_iterator(&req.stream_name, &req.shard_id, position) {
        Ok(shard_iterator) => json_response(&GetShardIteratorResponse { shard_iterator }),
        Err(e) => engine_error(&e),
    }
}

fn get_records(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: GetRecordsRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.get_records(&req.shard_iterator, req.limit) {
        Ok(result) => json_response(&GetRecordsResponse {
            records: result
                .records
                .iter()
                .map(|r| RecordResponse {
                    sequence_number: r.sequence_number.to_string(),
                    approximate_arrival_timestamp: r.arrival_time.timestamp() as f64,
                    data: BASE64.encode(&r.data),
                    partition_key: r.partition_key.clone(),
                })
                .collect(),
            next_shard_iterator: result.next_iterator,
            millis_behind_latest: result.millis_behind_latest,
        }),
        Err(e) => engine_error(&e),
    }
}

fn split_shard(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: SplitShardRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let new_start = match req.new_starting_hash_key.parse::<u128>() {
        Ok(h) => h,
        Err(_) => {
            return error_response(
                ErrorCode::InvalidArgumentException,
                "NewStartingHashKey is not a valid 128-bit hash key",
            )
        }
    };
    match storage.split_shard(&req.stream_name, &req.shard_to_split, new_start) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn merge_shards(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: MergeShardsRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.merge_shards(
        &req.stream_name,
        &req.shard_to_merge,
        &req.adjacent_shard_to_merge,
    ) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn start_stream_encryption(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StartStreamEncryptionRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if req.encryption_type != "KMS" {
        return error_response(
            ErrorCode::InvalidArgumentException,
            &format!("Unsupported EncryptionType: {}", req.encryption_type),
        );
    }
    match storage.start_stream_encryption(&req.stream_name, &req.key_id) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn stop_stream_encryption(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.stop_stream_encryption(&req.stream_name) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn add_tags(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: AddTagsRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.add_tags(&req.stream_name, req.tags) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn list_tags(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: StreamNameRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.list_tags(&req.stream_name) {
        Ok(tags) => json_response(&serde_json::json!({
            "Tags": tags
                .into_iter()
                .map(|(key, value)| TagResponse { key, value })
                .collect::<Vec<_>>(),
            "HasMoreTags": false,
        })),
        Err(e) => engine_error(&e),
    }
}

fn remove_tags(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: RemoveTagsRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.remove_tags(&req.stream_name, &req.tag_keys) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn register_consumer(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: RegisterConsumerRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.register_consumer(&req.stream_arn, &req.consumer_name) {
        Ok(consumer) => json_response(&serde_json::json!({
            "Consumer": consumer_response(&consumer),
        })),
        Err(e) => engine_error(&e),
    }
}

fn deregister_consumer(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: ConsumerRefRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.deregister_consumer(
        req.stream_arn.as_deref(),
        req.consumer_name.as_deref(),
        req.consumer_arn.as_deref(),
    ) {
        Ok(()) => empty_response(),
        Err(e) => engine_error(&e),
    }
}

fn describe_consumer(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: ConsumerRefRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.describe_consumer(
        req.stream_arn.as_deref(),
        req.consumer_name.as_deref(),
        req.consumer_arn.as_deref(),
    ) {
        Ok(consumer) => json_response(&serde_json::json!({
            "ConsumerDescription": consumer_response(&consumer),
        })),
        Err(e) => engine_error(&e),
    }
}

fn list_consumers(storage: &KinesisStorage, body: &Bytes) -> Response {
    let req: ListConsumersRequest = match parse(body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    match storage.list_consumers(&req.stream_arn) {
        Ok(consumers) => json_response(&serde_json::json!({
            "Consumers": consumers.iter().map(consumer_response).collect::<Vec<_>>(),
        })),
        Err(e) => engine_error(&e),
    }
}

// === Response shaping ===

fn encryption_type(kms_key_id: Option<&str>) -> &'static str {
    if kms_key_id.is_some() {
        "KMS"
    } else {
        "NONE"
    }
}

fn stream_description_response(description: &StreamDescription) -> StreamDescriptionResponse {
    StreamDescriptionResponse {
        stream_name: description.name.clone(),
        stream_arn: description.arn.clone(),
        stream_status: description.status.as_str().to_string(),
        stream_creation_timestamp: description.created_at.timestamp() as f64,
        retention_period_hours: description.retention_hours,
        encryption_type: encryption_type(description.kms_key_id.as_deref()).to_string(),
        key_id: description.kms_key_id.clone(),
        shards: description.shards.iter().map(shard_response).collect(),
        has_more_shards: false,
    }
}

fn shard_response(shard: &ShardSummary) -> ShardResponse {
    ShardResponse {
        shard_id: shard.shard_id.clone(),
        parent_shard_id: shard.parent_shard_id.clone(),
        adjacent_parent_shard_id: shard.adjacent_parent_shard_id.clone(),
        hash_key_range: HashKeyRange {
            starting_hash_key: shard.starting_hash_key.to_string(),
            ending_hash_key: shard.ending_hash_key.to_string(),
        },
        sequence_number_range: SequenceNumberRange {
            starting_sequence_number: shard.starting_sequence_number.to_string(),
            ending_sequence_number: shard.ending_sequence_number.map(|s| s.to_string()),
        },
    }
}

fn consumer_response(consumer: &ConsumerInfo) -> ConsumerResponse {
    ConsumerResponse {
        consumer_name: consumer.name.clone(),
        consumer_arn: consumer.arn.clone(),
        consumer_status: "ACTIVE".to_string(),
        consumer_creation_timestamp: consumer.created_at.timestamp() as f64,
    }
}

// === Helpers ===

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

fn decode_data(data: &str) -> Result<Vec<u8>, Response> {
    BASE64.decode(data).map_err(|_| {
        error_response(
            ErrorCode::InvalidArgumentException,
            "Data is not valid base64",
        )
    })
}

fn parse_hash_key(raw: Option<&str>) -> Result<Option<u128>, Response> {
    match raw {
        None => Ok(None),
        Some(s) => s.parse::<u128>().map(Some).map_err(|_| {
            error_response(
                ErrorCode::InvalidArgumentException,
                "ExplicitHashKey is not a valid 128-bit hash key",
            )
        }),
    }
}

fn timestamp_from_epoch(seconds: f64) -> DateTime<Utc> {
    let secs = seconds.trunc() as i64;
    let nanos = (seconds.fract() * 1e9) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
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

fn engine_error(err: &KinesisError) -> Response {
    error_response(err.code(), &err.to_string())
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .expect("valid response")
}
