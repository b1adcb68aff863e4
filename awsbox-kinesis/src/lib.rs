//! AWS Kinesis emulation for awsbox
//!
//! Provides an in-memory sharded record stream with support for:
//! - Stream lifecycle (create, delete, describe, retention)
//! - PutRecord / PutRecords with MD5 partition-key routing
//! - Shard iterators and GetRecords
//! - Resharding (SplitShard / MergeShards)
//! - Stream encryption metadata, tags, and enhanced fan-out consumers

pub mod handlers;
mod iterator;
pub mod storage;


pub use handlers::{handle_request, KinesisState};
pub use storage::{KinesisError, KinesisStorage};
