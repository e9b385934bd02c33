// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Error types for the Pollen system
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Pollen operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The randomness source could not deliver the requested length
    #[error("Entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    /// Writing to the entropy pool device failed
    #[error("Pool feedback failed: {0}")]
    PoolFeedbackFailed(String),

    /// Response framing or decoding failed
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    /// Connection or TLS failure talking to a peer
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server's challenge response did not match our challenge
    #[error("Challenge response mismatch")]
    ChallengeMismatch,

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exchange task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error means "service degraded, try later"
    pub fn is_degraded(&self) -> bool {
        matches!(self, Error::EntropySourceUnavailable(_))
    }

    /// Stable machine-readable kind, used in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EntropySourceUnavailable(_) => "entropy_source_unavailable",
            Error::PoolFeedbackFailed(_) => "pool_feedback_failed",
            Error::EncodingFailed(_) => "encoding_failed",
            Error::Transport(_) => "transport_error",
            Error::ChallengeMismatch => "challenge_mismatch",
            Error::Config(_) => "config_error",
            Error::Validation(_) => "validation_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::EncodingFailed(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::EncodingFailed(format!("Invalid base64: {}", e))
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::EncodingFailed(format!("Invalid hex: {}", e))
    }
}
