//! AWS S3 emulation for awsbox
//!
//! CRUD-level, path-style object store: buckets, objects, copy, tagging,
//! and multipart uploads. REST/XML rather than the JSON target protocol
//! the other services speak.

pub mod handlers;
pub mod storage;
mod xml;

pub use handlers::S3State;
pub use storage::{S3Error, S3Storage};
