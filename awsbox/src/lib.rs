//! awsbox: local AWS emulator
//!
//! Speaks the AWS JSON 1.x target protocol (Kinesis, KMS) and path-style
//! REST (S3) on a single listener, so real AWS SDK clients can be pointed
//! at it during development and testing.

pub mod router;

pub use router::{create_router, AppState, ServiceConfig};
