//! Core types and traits for awsbox
//!
//! This crate provides common types used across all awsbox services.

pub mod arn;
pub mod clock;
pub mod error;
pub mod request_id;

pub use arn::ArnGenerator;
pub use clock::Clock;
pub use error::{AwsError, ErrorCode};
pub use request_id::RequestId;
