//! End-to-end tests driving the full router over a real listener.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use awsbox::{create_router, AppState, ServiceConfig};
use awsbox_core::ArnGenerator;

/// Boot the emulator on an ephemeral port and return its base URL.
async fn start_server() -> String {
    let state = AppState::new(ArnGenerator::default(), ServiceConfig::default());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// POST an AWS JSON 1.1 call and return (status, request id, body).
async fn call(
    client: &reqwest::Client,
    base_url: &str,
    target: &str,
    body: Value,
) -> (u16, String, Value) {
    let response = client
        .post(format!("{}/", base_url))
        .header("X-Amz-Target", target)
        .header("Content-Type", "application/x-amz-json-1.1")
        .header("Authorization", "AWS4-HMAC-SHA256 ignored")
        .body(body.to_string())
        .send()
        .await
        .unwrap();

    let status = response.status().as_u16();
    let request_id = response
        .headers()
        .get("x-amzn-RequestId")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let bytes = response.bytes().await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, request_id, body)
}

#[tokio::test]
async fn test_create_and_describe_stream() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    let (status, request_id, _) = call(
        &client,
        &base_url,
        "Kinesis_20131202.CreateStream",
        json!({"StreamName": "s", "ShardCount": 3}),
    )
    .await;
    assert_eq!(status, 200);
    assert!(!request_id.is_empty(), "every response carries a request id");

    let (status, _, body) = call(
        &client,
        &base_url,
        "Kinesis_20131202.ListShards",
        json!({"StreamName": "s"}),
    )
    .await;
    assert_eq!(status, 200);

    let shards = body["Shards"].as_array().unwrap();
    assert_eq!(shards.len(), 3);
    assert_eq!(shards[0]["ShardId"], "shardId-000000000000");
    assert_eq!(shards[2]["ShardId"], "shardId-000000000002");

    // Contiguous, disjoint ranges covering the whole space.
    assert_eq!(shards[0]["HashKeyRange"]["StartingHashKey"], "0");
    for pair in shards.windows(2) {
        let end: u128 = pair[0]["HashKeyRange"]["EndingHashKey"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let next: u128 = pair[1]["HashKeyRange"]["StartingHashKey"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(end + 1, next);
    }
    assert_eq!(
        shards[2]["HashKeyRange"]["EndingHashKey"],
        u128::MAX.to_string()
    );
}

#[tokio::test]
async fn test_put_get_ordering() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    call(
        &client,
        &base_url,
        "Kinesis_20131202.CreateStream",
        json!({"StreamName": "s", "ShardCount": 1}),
    )
    .await;

    for data in [b"A".as_slice(), b"B".as_slice()] {
        let (status, _, _) = call(
            &client,
            &base_url,
            "Kinesis_20131202.PutRecord",
            json!({
                "StreamName": "s",
                "Data": BASE64.encode(data),
                "PartitionKey": "x",
            }),
        )
        .await;
        assert_eq!(status, 200);
    }

    let (_, _, body) = call(
        &client,
        &base_url,
        "Kinesis_20131202.GetShardIterator",
        json!({
            "StreamName": "s",
            "ShardId": "shardId-000000000000",
            "ShardIteratorType": "TRIM_HORIZON",
        }),
    )
    .await;
    let iterator = body["ShardIterator"].as_str().unwrap().to_string();

    let (status, _, body) = call(
        &client,
        &base_url,
        "Kinesis_20131202.GetRecords",
        json!({"ShardIterator": iterator, "Limit": 10}),
    )
    .await;
    assert_eq!(status, 200);

    let records = body["Records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["Data"], BASE64.encode(b"A"));
    assert_eq!(records[1]["Data"], BASE64.encode(b"B"));

    let first: u128 = records[0]["SequenceNumber"].as_str().unwrap().parse().unwrap();
    let second: u128 = records[1]["SequenceNumber"].as_str().unwrap().parse().unwrap();
    assert!(first < second);
    assert!(body["NextShardIterator"].is_string());
}

#[tokio::test]
async fn test_put_record_read_back_at_sequence_number() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    call(
        &client,
        &base_url,
        "Kinesis_20131202.CreateStream",
        json!({"StreamName": "s", "ShardCount": 2}),
    )
    .await;

    let (_, _, put) = call(
        &client,
        &base_url,
        "Kinesis_20131202.PutRecord",
        json!({
            "StreamName": "s",
            "Data": BASE64.encode(b"payload"),
            "PartitionKey": "pk",
        }),
    )
    .await;
    let shard_id = put["ShardId"].as_str().unwrap().to_string();
    let sequence = put["SequenceNumber"].as_str().unwrap().to_string();

    let (_, _, body) = call(
        &client,
        &base_url,
        "Kinesis_20131202.GetShardIterator",
        json!({
            "StreamName": "s",
            "ShardId": shard_id,
            "ShardIteratorType": "AT_SEQUENCE_NUMBER",
            "StartingSequenceNumber": sequence,
        }),
    )
    .await;
    let iterator = body["ShardIterator"].as_str().unwrap().to_string();

    let (_, _, body) = call(
        &client,
        &base_url,
        "Kinesis_20131202.GetRecords",
        json!({"ShardIterator": iterator}),
    )
    .await;
    let records = body["Records"].as_array().unwrap();
    assert_eq!(records[0]["SequenceNumber"], sequence.as_str());
    assert_eq!(records[0]["Data"], BASE64.encode(b"payload"));
}

#[tokio::test]
async fn test_kms_round_trip_and_context_mismatch() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    let (status, _, created) =
        call(&client, &base_url, "TrentService.CreateKey", json!({})).await;
    assert_eq!(status, 200);
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let (status, _, encrypted) = call(
        &client,
        &base_url,
        "TrentService.Encrypt",
        json!({
            "KeyId": key_id,
            "Plaintext": BASE64.encode(b"hello"),
            "EncryptionContext": {"u": "1"},
        }),
    )
    .await;
    assert_eq!(status, 200);
    let blob = encrypted["CiphertextBlob"].as_str().unwrap().to_string();

    let (status, _, decrypted) = call(
        &client,
        &base_url,
        "TrentService.Decrypt",
        json!({
            "CiphertextBlob": blob,
            "EncryptionContext": {"u": "1"},
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(decrypted["Plaintext"], BASE64.encode(b"hello"));
    assert_eq!(
        decrypted["KeyId"],
        format!("arn:aws:kms:us-east-1:12345:key/{}", key_id)
    );

    let (status, _, error) = call(
        &client,
        &base_url,
        "TrentService.Decrypt",
        json!({
            "CiphertextBlob": blob,
            "EncryptionContext": {"u": "2"},
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(error["__type"], "TrentService#InvalidCiphertextException");
}

#[tokio::test]
async fn test_kms_alias_and_rotation() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    let (_, _, created) = call(&client, &base_url, "TrentService.CreateKey", json!({})).await;
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let (status, _, _) = call(
        &client,
        &base_url,
        "TrentService.CreateAlias",
        json!({"AliasName": "alias/x", "TargetKeyId": key_id}),
    )
    .await;
    assert_eq!(status, 200);

    let (_, _, first) = call(
        &client,
        &base_url,
        "TrentService.Encrypt",
        json!({"KeyId": "alias/x", "Plaintext": BASE64.encode(b"p")}),
    )
    .await;

    call(
        &client,
        &base_url,
        "TrentService.EnableKeyRotation",
        json!({"KeyId": key_id}),
    )
    .await;
    let (status, _, _) = call(
        &client,
        &base_url,
        "TrentService.RotateKeyOnDemand",
        json!({"KeyId": key_id}),
    )
    .await;
    assert_eq!(status, 200);

    let (_, _, second) = call(
        &client,
        &base_url,
        "TrentService.Encrypt",
        json!({"KeyId": "alias/x", "Plaintext": BASE64.encode(b"p")}),
    )
    .await;
    assert_ne!(first["CiphertextBlob"], second["CiphertextBlob"]);

    // Ciphertexts from both material versions decrypt.
    for blob in [&first["CiphertextBlob"], &second["CiphertextBlob"]] {
        let (status, _, decrypted) = call(
            &client,
            &base_url,
            "TrentService.Decrypt",
            json!({"CiphertextBlob": blob}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(decrypted["Plaintext"], BASE64.encode(b"p"));
    }
}

#[tokio::test]
async fn test_unknown_target_is_404_with_empty_body() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/", base_url))
        .header("X-Amz-Target", "NoSuchService_2020.DoThing")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    assert!(response
        .headers()
        .get("x-amzn-RequestId")
        .is_some());
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_s3_object_round_trip() {
    let base_url = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .put(format!("{}/my-bucket", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .put(format!("{}/my-bucket/path/to/key", base_url))
        .header("Content-Type", "text/plain")
        .body("contents")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().get("etag").is_some());

    let response = client
        .get(format!("{}/my-bucket/path/to/key", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "contents");

    let response = client
        .get(format!("{}/my-bucket/missing", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(response.text().await.unwrap().contains("NoSuchKey"));
}

#[tokio::test]
async fn test_health_endpoint() {
    let base_url = start_server().await;
    let response = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.text().await.unwrap().contains("running"));
}
