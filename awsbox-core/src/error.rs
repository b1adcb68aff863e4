//! AWS error taxonomy and wire formatting
//!
//! Every error a service can return maps to one of these codes. The wire
//! form for JSON services is `{"__type": "<Prefix>#<Code>", "message": ...}`
//! with the fixed HTTP status below.

use serde::Serialize;
use thiserror::Error;

/// Closed set of error codes the emulator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Common
    ResourceNotFoundException,
    ResourceInUseException,
    InvalidArgumentException,
    LimitExceededException,
    ValidationException,
    MissingParameter,

    // Kinesis
    ExpiredIteratorException,
    TrimmedDataAccessException,
    ProvisionedThroughputExceededException,

    // KMS
    KMSInvalidStateException,
    InvalidCiphertextException,
    NotAuthorizedException,

    InternalFailure,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::InvalidArgumentException => "InvalidArgumentException",
            Self::LimitExceededException => "LimitExceededException",
            Self::ValidationException => "ValidationException",
            Self::MissingParameter => "MissingParameter",
            Self::ExpiredIteratorException => "ExpiredIteratorException",
            Self::TrimmedDataAccessException => "TrimmedDataAccessException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::KMSInvalidStateException => "KMSInvalidStateException",
            Self::InvalidCiphertextException => "InvalidCiphertextException",
            Self::NotAuthorizedException => "NotAuthorizedException",
            Self::InternalFailure => "InternalFailure",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InternalFailure => 500,
            _ => 400,
        }
    }
}

/// AWS-style error: a code from the closed taxonomy plus a human message.
#[derive(Debug, Error)]
#[error("{}: {message}", code.as_str())]
pub struct AwsError {
    pub code: ErrorCode,
    pub message: String,
}

impl AwsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Format as an AWS JSON 1.1 error body.
    ///
    /// `prefix` is the service's target prefix, e.g. `Kinesis_20131202`.
    pub fn to_json(&self, prefix: &str) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: String,
            message: &'a str,
        }

        let error = JsonError {
            error_type: format!("{}#{}", prefix, self.code.as_str()),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"__type":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message
            )
        })
    }
}
