//! Kinesis in-memory storage engine
//!
//! All stream state lives behind one mutex. Sequence numbers, shard ids,
//! and resharding decisions are made inside the lock, and every value
//! handed back to handlers is an owned snapshot.

use awsbox_core::{ArnGenerator, Clock, ErrorCode};
use chrono::{DateTime, Duration, Utc};
use md5::{Digest, Md5};
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::iterator::{self, IteratorPayload, ITERATOR_TTL_SECS};

pub const MIN_RETENTION_HOURS: i64 = 24;
pub const MAX_RETENTION_HOURS: i64 = 8760;
pub const MAX_SHARDS_PER_STREAM: u64 = 1000;

pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
pub const MAX_BATCH_RECORDS: usize = 500;
pub const MAX_BATCH_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_GET_RECORDS: usize = 10_000;
pub const MAX_GET_BYTES: usize = 10 * 1024 * 1024;

const MAX_TAGS_PER_CALL: usize = 10;
const MAX_TAGS_PER_STREAM: usize = 50;

/// Shard ordinals are packed into the top bits of the 128-bit sequence
/// space, reserving a disjoint range per shard so sequence numbers stay
/// globally unique across resharding.
const SEQUENCE_ORDINAL_SHIFT: u32 = 120;

/// Stream status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Active,
    Updating,
    Deleting,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Deleting => "DELETING",
        }
    }
}

/// Where to start reading a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorPosition {
    TrimHorizon,
    Latest,
    AtSequenceNumber(u128),
    AfterSequenceNumber(u128),
    AtTimestamp(DateTime<Utc>),
}

/// A record as stored in a shard.
#[derive(Debug, Clone)]
pub struct Record {
    pub sequence_number: u128,
    pub partition_key: String,
    pub data: Vec<u8>,
    pub arrival_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Shard {
    shard_id: String,
    starting_hash_key: u128,
    ending_hash_key: u128,
    starting_sequence_number: u128,
    ending_sequence_number: Option<u128>,
    next_sequence_number: u128,
    /// Highest sequence number removed by retention trimming.
    trimmed_through: u128,
    parent_shard_id: Option<String>,
    adjacent_parent_shard_id: Option<String>,
    records: VecDeque<Record>,
}

impl Shard {
    fn new(ordinal: u64, hash_range: (u128, u128), min_sequence: u128) -> Self {
        let base = ((ordinal as u128) << SEQUENCE_ORDINAL_SHIFT) + 1;
        let start = base.max(min_sequence);
        Self {
            shard_id: format!("shardId-{:012}", ordinal),
            starting_hash_key: hash_range.0,
            ending_hash_key: hash_range.1,
            starting_sequence_number: start,
            ending_sequence_number: None,
            next_sequence_number: start,
            trimmed_through: 0,
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
            records: VecDeque::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.ending_sequence_number.is_none()
    }

    fn close(&mut self) {
        self.ending_sequence_number = Some(self.next_sequence_number - 1);
    }

    fn append(&mut self, partition_key: String, data: Vec<u8>, now: DateTime<Utc>) -> u128 {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;
        self.records.push_back(Record {
            sequence_number,
            partition_key,
            data,
            arrival_time: now,
        });
        sequence_number
    }

    fn trim(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.records.front() {
            if front.arrival_time >= cutoff {
                break;
            }
            self.trimmed_through = front.sequence_number;
            self.records.pop_front();
        }
    }
}

#[derive(Debug, Clone)]
struct Consumer {
    name: String,
    arn: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Stream {
    name: String,
    arn: String,
    status: StreamStatus,
    created_at: DateTime<Utc>,
    retention: Duration,
    kms_key_id: Option<String>,
    shards: Vec<Shard>,
    next_shard_ordinal: u64,
    tags: HashMap<String, String>,
    consumers: HashMap<String, Consumer>,
}

impl Stream {
    fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        for shard in &mut self.shards {
            shard.trim(cutoff);
        }
    }

    fn shard(&self, shard_id: &str) -> Option<&Shard> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }

    fn shard_mut(&mut self, shard_id: &str) -> Option<&mut Shard> {
        self.shards.iter_mut().find(|s| s.shard_id == shard_id)
    }

    /// The unique OPEN shard whose hash range contains `hash_key`.
    fn route(&self, hash_key: u128) -> Option<&Shard> {
        self.shards.iter().find(|s| {
            s.is_open() && s.starting_hash_key <= hash_key && hash_key <= s.ending_hash_key
        })
    }

    fn allocate_shard(&mut self, hash_range: (u128, u128), min_sequence: u128) -> usize {
        let ordinal = self.next_shard_ordinal;
        self.next_shard_ordinal += 1;
        self.shards.push(Shard::new(ordinal, hash_range, min_sequence));
        self.shards.len() - 1
    }
}

// === Snapshots returned to handlers ===

#[derive(Debug, Clone)]
pub struct ShardSummary {
    pub shard_id: String,
    pub starting_hash_key: u128,
    pub ending_hash_key: u128,
    pub starting_sequence_number: u128,
    pub ending_sequence_number: Option<u128>,
    pub parent_shard_id: Option<String>,
    pub adjacent_parent_shard_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StreamDescription {
    pub name: String,
    pub arn: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
    pub retention_hours: i64,
    pub kms_key_id: Option<String>,
    pub shards: Vec<ShardSummary>,
}

#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub name: String,
    pub arn: String,
    pub status: StreamStatus,
    pub created_at: DateTime<Utc>,
    pub retention_hours: i64,
    pub kms_key_id: Option<String>,
    pub open_shard_count: usize,
    pub consumer_count: usize,
}

#[derive(Debug, Clone)]
pub struct PutRecordResult {
    pub shard_id: String,
    pub sequence_number: u128,
}

#[derive(Debug, Clone)]
pub struct PutRecordsEntry {
    pub data: Vec<u8>,
    pub partition_key: String,
    pub explicit_hash_key: Option<u128>,
}

#[derive(Debug)]
pub struct GetRecordsResult {
    pub records: Vec<Record>,
    pub next_iterator: Option<String>,
    pub millis_behind_latest: i64,
}

#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub name: String,
    pub arn: String,
    pub created_at: DateTime<Utc>,
}

/// Kinesis errors
#[derive(Debug, thiserror::Error)]
pub enum KinesisError {
    #[error("Stream {0} not found")]
    StreamNotFound(String),

    #[error("Stream {0} already exists")]
    StreamAlreadyExists(String),

    #[error("Stream {0} is not in a state to accept this operation")]
    StreamNotActive(String),

    #[error("Shard {0} not found")]
    ShardNotFound(String),

    #[error("Consumer {0} not found")]
    ConsumerNotFound(String),

    #[error("Consumer {0} already exists")]
    ConsumerAlreadyExists(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    LimitExceeded(String),

    #[error("Iterator expired")]
    ExpiredIterator,

    #[error("Iterator points to trimmed data on shard {0}")]
    TrimmedDataAccess(String),
}

impl KinesisError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StreamNotFound(_) | Self::ShardNotFound(_) | Self::ConsumerNotFound(_) => {
                ErrorCode::ResourceNotFoundException
            }
            Self::StreamAlreadyExists(_)
            | Self::StreamNotActive(_)
            | Self::ConsumerAlreadyExists(_) => ErrorCode::ResourceInUseException,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgumentException,
            Self::LimitExceeded(_) => ErrorCode::LimitExceededException,
            Self::ExpiredIterator => ErrorCode::ExpiredIteratorException,
            Self::TrimmedDataAccess(_) => ErrorCode::TrimmedDataAccessException,
        }
    }
}

/// Hash a partition key into the 128-bit routing space.
pub fn partition_key_hash(partition_key: &str) -> u128 {
    let digest: [u8; 16] = Md5::digest(partition_key.as_bytes()).into();
    u128::from_be_bytes(digest)
}

/// In-memory Kinesis engine
pub struct KinesisStorage {
    arn: ArnGenerator,
    clock: Clock,
    default_retention: Duration,
    iterator_secret: [u8; 32],
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Stream>,
}

impl KinesisStorage {
    pub fn new(arn: ArnGenerator, default_retention: Duration) -> Self {
        Self::with_clock(arn, default_retention, Clock::system())
    }

    pub fn with_clock(arn: ArnGenerator, default_retention: Duration, clock: Clock) -> Self {
        let mut iterator_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut iterator_secret);
        Self {
            arn,
            clock,
            default_retention,
            iterator_secret,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("kinesis state lock poisoned")
    }

    // === Stream lifecycle ===

    pub fn create_stream(
        &self,
        name: &str,
        shard_count: u64,
    ) -> Result<StreamDescription, KinesisError> {
        if name.is_empty() {
            return Err(KinesisError::InvalidArgument(
                "StreamName must not be empty".to_string(),
            ));
        }
        if shard_count == 0 || shard_count > MAX_SHARDS_PER_STREAM {
            return Err(KinesisError::InvalidArgument(format!(
                "ShardCount must be between 1 and {}, got {}",
                MAX_SHARDS_PER_STREAM, shard_count
            )));
        }

        let mut inner = self.lock();
        if inner.streams.contains_key(name) {
            return Err(KinesisError::StreamAlreadyExists(name.to_string()));
        }

        // Tile the hash space into equal contiguous ranges, remainder to
        // the last shard.
        let width = u128::MAX / shard_count as u128;
        let mut stream = Stream {
            name: name.to_string(),
            arn: self.arn.generate("kinesis", "stream", name),
            // No async provisioning is modeled: streams are usable as soon
            // as CreateStream returns.
            status: StreamStatus::Active,
            created_at: self.clock.now(),
            retention: self.default_retention,
            kms_key_id: None,
            shards: Vec::with_capacity(shard_count as usize),
            next_shard_ordinal: 0,
            tags: HashMap::new(),
            consumers: HashMap::new(),
        };

        for i in 0..shard_count as u128 {
            let start = i * width;
            let end = if i == shard_count as u128 - 1 {
                u128::MAX
            } else {
                (i + 1) * width - 1
            };
            stream.allocate_shard((start, end), 0);
        }

        let description = describe(&stream);
        inner.streams.insert(name.to_string(), stream);
        Ok(description)
    }

    pub fn delete_stream(&self, name: &str) -> Result<(), KinesisError> {
        self.lock()
            .streams
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| KinesisError::StreamNotFound(name.to_string()))
    }

    pub fn describe_stream(&self, name: &str) -> Result<StreamDescription, KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, name)?;
        stream.trim(self.clock.now());
        Ok(describe(stream))
    }

    pub fn describe_stream_summary(&self, name: &str) -> Result<StreamSummary, KinesisError> {
        let inner = self.lock();
        let stream = get_stream(&inner, name)?;
        Ok(StreamSummary {
            name: stream.name.clone(),
            arn: stream.arn.clone(),
            status: stream.status,
            created_at: stream.created_at,
            retention_hours: stream.retention.num_hours(),
            kms_key_id: stream.kms_key_id.clone(),
            open_shard_count: stream.shards.iter().filter(|s| s.is_open()).count(),
            consumer_count: stream.consumers.len(),
        })
    }

    pub fn list_streams(&self) -> Vec<String> {
        let inner = self.lock();
        let mut names: Vec<String> = inner.streams.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_shards(&self, name: &str) -> Result<Vec<ShardSummary>, KinesisError> {
        Ok(self.describe_stream(name)?.shards)
    }

    // === Retention ===

    pub fn increase_retention(&self, name: &str, hours: i64) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, name)?;
        validate_retention_hours(hours)?;
        if hours <= stream.retention.num_hours() {
            return Err(KinesisError::InvalidArgument(format!(
                "Retention period {}h does not increase the current {}h",
                hours,
                stream.retention.num_hours()
            )));
        }
        stream.retention = Duration::hours(hours);
        Ok(())
    }

    pub fn decrease_retention(&self, name: &str, hours: i64) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, name)?;
        validate_retention_hours(hours)?;
        if hours >= stream.retention.num_hours() {
            return Err(KinesisError::InvalidArgument(format!(
                "Retention period {}h does not decrease the current {}h",
                hours,
                stream.retention.num_hours()
            )));
        }
        stream.retention = Duration::hours(hours);
        stream.trim(self.clock.now());
        Ok(())
    }

    // === Writes ===

    pub fn put_record(
        &self,
        stream_name: &str,
        partition_key: &str,
        data: Vec<u8>,
        explicit_hash_key: Option<u128>,
    ) -> Result<PutRecordResult, KinesisError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        if stream.status != StreamStatus::Active {
            return Err(KinesisError::StreamNotActive(stream_name.to_string()));
        }
        stream.trim(now);
        append_record(stream, partition_key, data, explicit_hash_key, now)
    }

    /// Batch put. Record-level failures come back in input order; only
    /// stream-level problems fail the whole call.
    pub fn put_records(
        &self,
        stream_name: &str,
        entries: Vec<PutRecordsEntry>,
    ) -> Result<Vec<Result<PutRecordResult, KinesisError>>, KinesisError> {
        if entries.is_empty() {
            return Err(KinesisError::InvalidArgument(
                "Records must not be empty".to_string(),
            ));
        }
        if entries.len() > MAX_BATCH_RECORDS {
            return Err(KinesisError::LimitExceeded(format!(
                "Too many records in batch: {} > {}",
                entries.len(),
                MAX_BATCH_RECORDS
            )));
        }
        let total: usize = entries.iter().map(|e| e.data.len()).sum();
        if total > MAX_BATCH_BYTES {
            return Err(KinesisError::LimitExceeded(format!(
                "Batch size {} exceeds {} bytes",
                total, MAX_BATCH_BYTES
            )));
        }

        let now = self.clock.now();
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        if stream.status != StreamStatus::Active {
            return Err(KinesisError::StreamNotActive(stream_name.to_string()));
        }
        stream.trim(now);

        Ok(entries
            .into_iter()
            .map(|e| append_record(stream, &e.partition_key, e.data, e.explicit_hash_key, now))
            .collect())
    }

    // === Reads ===

    pub fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: IteratorPosition,
    ) -> Result<String, KinesisError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        stream.trim(now);
        let shard = stream
            .shard(shard_id)
            .ok_or_else(|| KinesisError::ShardNotFound(shard_id.to_string()))?;

        let sequence = match position {
            IteratorPosition::TrimHorizon => shard
                .records
                .front()
                .map(|r| r.sequence_number)
                .unwrap_or(shard.next_sequence_number),
            IteratorPosition::Latest => shard.next_sequence_number,
            IteratorPosition::AtSequenceNumber(s) => {
                if s < shard.starting_sequence_number {
                    return Err(KinesisError::InvalidArgument(format!(
                        "Sequence number {} precedes shard {}",
                        s, shard_id
                    )));
                }
                s
            }
            IteratorPosition::AfterSequenceNumber(s) => {
                if s < shard.starting_sequence_number {
                    return Err(KinesisError::InvalidArgument(format!(
                        "Sequence number {} precedes shard {}",
                        s, shard_id
                    )));
                }
                s + 1
            }
            IteratorPosition::AtTimestamp(ts) => shard
                .records
                .iter()
                .find(|r| r.arrival_time >= ts)
                .map(|r| r.sequence_number)
                .unwrap_or(shard.next_sequence_number),
        };

        Ok(self.issue_iterator(stream_name, shard_id, sequence, now))
    }

    pub fn get_records(
        &self,
        shard_iterator: &str,
        limit: Option<usize>,
    ) -> Result<GetRecordsResult, KinesisError> {
        let limit = limit.unwrap_or(MAX_GET_RECORDS);
        if limit == 0 || limit > MAX_GET_RECORDS {
            return Err(KinesisError::InvalidArgument(format!(
                "Limit must be between 1 and {}, got {}",
                MAX_GET_RECORDS, limit
            )));
        }

        let payload = iterator::verify(&self.iterator_secret, shard_iterator)
            .ok_or_else(|| KinesisError::InvalidArgument("Invalid ShardIterator".to_string()))?;
        let position = payload
            .sequence()
            .ok_or_else(|| KinesisError::InvalidArgument("Invalid ShardIterator".to_string()))?;

        let now = self.clock.now();
        if now.timestamp() - payload.issued_at > ITERATOR_TTL_SECS {
            return Err(KinesisError::ExpiredIterator);
        }

        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, &payload.stream_name)?;
        stream.trim(now);
        let shard = stream
            .shard(&payload.shard_id)
            .ok_or_else(|| KinesisError::ShardNotFound(payload.shard_id.clone()))?;

        if position <= shard.trimmed_through {
            return Err(KinesisError::TrimmedDataAccess(payload.shard_id.clone()));
        }

        let mut records = Vec::new();
        let mut bytes = 0usize;
        for record in shard.records.iter() {
            if record.sequence_number < position {
                continue;
            }
            if records.len() >= limit || bytes + record.data.len() > MAX_GET_BYTES {
                break;
            }
            bytes += record.data.len();
            records.push(record.clone());
        }

        let next_position = records
            .last()
            .map(|r| r.sequence_number + 1)
            .unwrap_or(position);
        let millis_behind_latest = records
            .last()
            .map(|r| (now - r.arrival_time).num_milliseconds().max(0))
            .unwrap_or(0);

        let exhausted = match shard.ending_sequence_number {
            Some(end) => next_position > end,
            None => false,
        };
        let next_iterator = if exhausted {
            None
        } else {
            Some(self.issue_iterator(&payload.stream_name, &payload.shard_id, next_position, now))
        };

        Ok(GetRecordsResult {
            records,
            next_iterator,
            millis_behind_latest,
        })
    }

    fn issue_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        sequence: u128,
        now: DateTime<Utc>,
    ) -> String {
        iterator::sign(
            &self.iterator_secret,
            &IteratorPayload {
                stream_name: stream_name.to_string(),
                shard_id: shard_id.to_string(),
                sequence_number: sequence.to_string(),
                issued_at: now.timestamp(),
            },
        )
    }

    // === Resharding ===

    pub fn split_shard(
        &self,
        stream_name: &str,
        shard_id: &str,
        new_starting_hash_key: u128,
    ) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        if stream.status != StreamStatus::Active {
            return Err(KinesisError::StreamNotActive(stream_name.to_string()));
        }

        let parent = stream
            .shard(shard_id)
            .ok_or_else(|| KinesisError::ShardNotFound(shard_id.to_string()))?;
        if !parent.is_open() {
            return Err(KinesisError::InvalidArgument(format!(
                "Shard {} is not open",
                shard_id
            )));
        }
        if new_starting_hash_key <= parent.starting_hash_key
            || new_starting_hash_key >= parent.ending_hash_key
        {
            return Err(KinesisError::InvalidArgument(format!(
                "NewStartingHashKey {} is not strictly inside shard {}",
                new_starting_hash_key, shard_id
            )));
        }

        let parent_range = (parent.starting_hash_key, parent.ending_hash_key);
        let min_sequence = parent.next_sequence_number;

        stream
            .shard_mut(shard_id)
            .expect("parent looked up above")
            .close();

        let left = stream.allocate_shard(
            (parent_range.0, new_starting_hash_key - 1),
            min_sequence,
        );
        stream.shards[left].parent_shard_id = Some(shard_id.to_string());
        let right =
            stream.allocate_shard((new_starting_hash_key, parent_range.1), min_sequence);
        stream.shards[right].parent_shard_id = Some(shard_id.to_string());

        Ok(())
    }

    pub fn merge_shards(
        &self,
        stream_name: &str,
        shard_id: &str,
        adjacent_shard_id: &str,
    ) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        if stream.status != StreamStatus::Active {
            return Err(KinesisError::StreamNotActive(stream_name.to_string()));
        }

        let a = stream
            .shard(shard_id)
            .ok_or_else(|| KinesisError::ShardNotFound(shard_id.to_string()))?;
        let b = stream
            .shard(adjacent_shard_id)
            .ok_or_else(|| KinesisError::ShardNotFound(adjacent_shard_id.to_string()))?;
        if !a.is_open() || !b.is_open() {
            return Err(KinesisError::InvalidArgument(
                "Both shards must be open".to_string(),
            ));
        }

        let contiguous = a.ending_hash_key.checked_add(1) == Some(b.starting_hash_key)
            || b.ending_hash_key.checked_add(1) == Some(a.starting_hash_key);
        if !contiguous {
            return Err(KinesisError::InvalidArgument(format!(
                "Shards {} and {} are not adjacent",
                shard_id, adjacent_shard_id
            )));
        }

        let range = (
            a.starting_hash_key.min(b.starting_hash_key),
            a.ending_hash_key.max(b.ending_hash_key),
        );
        let min_sequence = a.next_sequence_number.max(b.next_sequence_number);

        stream.shard_mut(shard_id).expect("looked up above").close();
        stream
            .shard_mut(adjacent_shard_id)
            .expect("looked up above")
            .close();

        let child = stream.allocate_shard(range, min_sequence);
        stream.shards[child].parent_shard_id = Some(shard_id.to_string());
        stream.shards[child].adjacent_parent_shard_id = Some(adjacent_shard_id.to_string());

        Ok(())
    }

    // === Encryption metadata ===

    pub fn start_stream_encryption(
        &self,
        stream_name: &str,
        kms_key_id: &str,
    ) -> Result<(), KinesisError> {
        if kms_key_id.is_empty() {
            return Err(KinesisError::InvalidArgument(
                "KeyId must not be empty".to_string(),
            ));
        }
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        stream.kms_key_id = Some(kms_key_id.to_string());
        Ok(())
    }

    pub fn stop_stream_encryption(&self, stream_name: &str) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        stream.kms_key_id = None;
        Ok(())
    }

    // === Tags ===

    pub fn add_tags(
        &self,
        stream_name: &str,
        tags: HashMap<String, String>,
    ) -> Result<(), KinesisError> {
        if tags.is_empty() || tags.len() > MAX_TAGS_PER_CALL {
            return Err(KinesisError::InvalidArgument(format!(
                "Between 1 and {} tags per call",
                MAX_TAGS_PER_CALL
            )));
        }
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        let new_keys = tags.keys().filter(|k| !stream.tags.contains_key(*k)).count();
        if stream.tags.len() + new_keys > MAX_TAGS_PER_STREAM {
            return Err(KinesisError::LimitExceeded(format!(
                "A stream may carry at most {} tags",
                MAX_TAGS_PER_STREAM
            )));
        }
        stream.tags.extend(tags);
        Ok(())
    }

    pub fn list_tags(&self, stream_name: &str) -> Result<Vec<(String, String)>, KinesisError> {
        let inner = self.lock();
        let stream = get_stream(&inner, stream_name)?;
        let mut tags: Vec<(String, String)> = stream
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tags.sort();
        Ok(tags)
    }

    pub fn remove_tags(&self, stream_name: &str, keys: &[String]) -> Result<(), KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_mut(&mut inner, stream_name)?;
        for key in keys {
            stream.tags.remove(key);
        }
        Ok(())
    }

    // === Enhanced fan-out consumers (metadata only) ===

    pub fn register_consumer(
        &self,
        stream_arn: &str,
        consumer_name: &str,
    ) -> Result<ConsumerInfo, KinesisError> {
        if consumer_name.is_empty() || consumer_name.len() > 128 {
            return Err(KinesisError::InvalidArgument(
                "ConsumerName must be 1-128 characters".to_string(),
            ));
        }
        let now = self.clock.now();
        let mut inner = self.lock();
        let stream = get_stream_by_arn_mut(&mut inner, stream_arn)?;
        if stream.consumers.contains_key(consumer_name) {
            return Err(KinesisError::ConsumerAlreadyExists(
                consumer_name.to_string(),
            ));
        }
        let consumer = Consumer {
            name: consumer_name.to_string(),
            arn: format!("{}/consumer/{}", stream.arn, consumer_name),
            created_at: now,
        };
        let info = consumer_info(&consumer);
        stream.consumers.insert(consumer_name.to_string(), consumer);
        Ok(info)
    }

    pub fn deregister_consumer(
        &self,
        stream_arn: Option<&str>,
        consumer_name: Option<&str>,
        consumer_arn: Option<&str>,
    ) -> Result<(), KinesisError> {
        let (stream_arn, name) = resolve_consumer_ref(stream_arn, consumer_name, consumer_arn)?;
        let mut inner = self.lock();
        let stream = get_stream_by_arn_mut(&mut inner, &stream_arn)?;
        stream
            .consumers
            .remove(&name)
            .map(|_| ())
            .ok_or(KinesisError::ConsumerNotFound(name))
    }

    pub fn describe_consumer(
        &self,
        stream_arn: Option<&str>,
        consumer_name: Option<&str>,
        consumer_arn: Option<&str>,
    ) -> Result<ConsumerInfo, KinesisError> {
        let (stream_arn, name) = resolve_consumer_ref(stream_arn, consumer_name, consumer_arn)?;
        let mut inner = self.lock();
        let stream = get_stream_by_arn_mut(&mut inner, &stream_arn)?;
        stream
            .consumers
            .get(&name)
            .map(consumer_info)
            .ok_or(KinesisError::ConsumerNotFound(name))
    }

    pub fn list_consumers(&self, stream_arn: &str) -> Result<Vec<ConsumerInfo>, KinesisError> {
        let mut inner = self.lock();
        let stream = get_stream_by_arn_mut(&mut inner, stream_arn)?;
        let mut consumers: Vec<ConsumerInfo> =
            stream.consumers.values().map(consumer_info).collect();
        consumers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(consumers)
    }
}

// === Free helpers (operate on locked state) ===

fn get_stream<'a>(inner: &'a Inner, name: &str) -> Result<&'a Stream, KinesisError> {
    inner
        .streams
        .get(name)
        .ok_or_else(|| KinesisError::StreamNotFound(name.to_string()))
}

fn get_stream_mut<'a>(inner: &'a mut Inner, name: &str) -> Result<&'a mut Stream, KinesisError> {
    inner
        .streams
        .get_mut(name)
        .ok_or_else(|| KinesisError::StreamNotFound(name.to_string()))
}

fn get_stream_by_arn_mut<'a>(
    inner: &'a mut Inner,
    arn: &str,
) -> Result<&'a mut Stream, KinesisError> {
    inner
        .streams
        .values_mut()
        .find(|s| s.arn == arn)
        .ok_or_else(|| KinesisError::StreamNotFound(arn.to_string()))
}

fn validate_retention_hours(hours: i64) -> Result<(), KinesisError> {
    if !(MIN_RETENTION_HOURS..=MAX_RETENTION_HOURS).contains(&hours) {
        return Err(KinesisError::InvalidArgument(format!(
            "RetentionPeriodHours must be between {} and {}, got {}",
            MIN_RETENTION_HOURS, MAX_RETENTION_HOURS, hours
        )));
    }
    Ok(())
}

fn append_record(
    stream: &mut Stream,
    partition_key: &str,
    data: Vec<u8>,
    explicit_hash_key: Option<u128>,
    now: DateTime<Utc>,
) -> Result<PutRecordResult, KinesisError> {
    if partition_key.is_empty() || partition_key.len() > 256 {
        return Err(KinesisError::InvalidArgument(
            "PartitionKey must be 1-256 characters".to_string(),
        ));
    }
    if data.len() > MAX_RECORD_BYTES {
        return Err(KinesisError::InvalidArgument(format!(
            "Record data of {} bytes exceeds the {} byte maximum",
            data.len(),
            MAX_RECORD_BYTES
        )));
    }

    let hash_key = explicit_hash_key.unwrap_or_else(|| partition_key_hash(partition_key));
    let shard_id = stream
        .route(hash_key)
        .map(|s| s.shard_id.clone())
        .ok_or_else(|| {
            // Open shards tile the full space; this is unreachable for a
            // healthy stream.
            KinesisError::InvalidArgument(format!("No open shard covers hash key {}", hash_key))
        })?;

    let shard = stream.shard_mut(&shard_id).expect("routed above");
    let sequence_number = shard.append(partition_key.to_string(), data, now);
    Ok(PutRecordResult {
        shard_id,
        sequence_number,
    })
}

fn resolve_consumer_ref(
    stream_arn: Option<&str>,
    consumer_name: Option<&str>,
    consumer_arn: Option<&str>,
) -> Result<(String, String), KinesisError> {
    if let Some(arn) = consumer_arn {
        let (stream, name) = arn.split_once("/consumer/").ok_or_else(|| {
            KinesisError::InvalidArgument(format!("Malformed consumer ARN {}", arn))
        })?;
        return Ok((stream.to_string(), name.to_string()));
    }
    match (stream_arn, consumer_name) {
        (Some(s), Some(n)) => Ok((s.to_string(), n.to_string())),
        _ => Err(KinesisError::InvalidArgument(
            "Provide ConsumerARN or StreamARN plus ConsumerName".to_string(),
        )),
    }
}

fn describe(stream: &Stream) -> StreamDescription {
    StreamDescription {
        name: stream.name.clone(),
        arn: stream.arn.clone(),
        status: stream.status,
        created_at: stream.created_at,
        retention_hours: stream.retention.num_hours(),
        kms_key_id: stream.kms_key_id.clone(),
        shards: stream
            .shards
            .iter()
            .map(|s| ShardSummary {
                shard_id: s.shard_id.clone(),
                starting_hash_key: s.starting_hash_key,
                ending_hash_key: s.ending_hash_key,
                starting_sequence_number: s.starting_sequence_number,
                ending_sequence_number: s.ending_sequence_number,
                parent_shard_id: s.parent_shard_id.clone(),
                adjacent_parent_shard_id: s.adjacent_parent_shard_id.clone(),
            })
            .collect(),
    }
}

fn consumer_info(c: &Consumer) -> ConsumerInfo {
    ConsumerInfo {
        name: c.name.clone(),
        arn: c.arn.clone(),
        created_at: c.created_at,
    }
}
