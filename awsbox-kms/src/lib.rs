//! AWS KMS emulation for awsbox
//!
//! Provides an in-memory key registry with support for:
//! - Key lifecycle (create, enable/disable, scheduled deletion, rotation)
//! - Aliases and tags
//! - Envelope encryption: Encrypt/Decrypt/ReEncrypt, data-key generation,
//!   and GenerateRandom, all over AES-256-GCM with a self-describing
//!   ciphertext format

mod ciphertext;
pub mod handlers;
pub mod storage;

pub use handlers::{handle_request, KmsState};
pub use storage::{KmsError, KmsStorage};
