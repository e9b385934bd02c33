// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Pollen Core Library
//!
//! This crate implements the entropy exchange protocol shared by the Pollen server and client.
//! A server draws fresh randomness, binds it to client-supplied context through a SHA-512
//! hash chain, feeds the intermediate digests back into the local entropy pool, and frames
//! a response. The client fetches that response and writes it into its own pool.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `source`: Bounded, exact-length draws from the OS CSPRNG or a device reader
//! - `mixer`: Cumulative SHA-512 accumulator with non-resetting checkpoints
//! - `sink`: Fire-and-forget feedback into the local entropy pool device
//! - `encoder`: Response framing (raw base64, sha512 hex, challenge digest)
//! - `handler`: Per-request orchestration of the exchange
//! - `protocol`: Request context and wire payload types
//! - `client`: HTTP client that fetches and decodes an exchange
//! - `metrics`: Request and pool feedback counters in Prometheus text format
//! - `config`: Configuration management with validation
//! - `error`: Unified error types
//!
//! # Data flow
//!
//! ```text
//! request ──> ProtocolHandler ──> Mixer <── RandomSource
//!                   │               │
//!                   │               └──> PoolFeedback ──> /dev/urandom
//!                   └──> encoder ──> response
//! ```

pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod mixer;
pub mod protocol;
pub mod sink;
pub mod source;

pub use error::{Error, Result};
pub use config::ResponseMode;

/// Library version for protocol compatibility
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of bytes drawn per exchange
pub const DEFAULT_DRAW_SIZE: usize = 64;

/// Maximum single draw size to prevent OOM
pub const MAX_DRAW_SIZE: usize = 65_536; // 64 KiB

/// Default entropy pool device
pub const DEFAULT_DEVICE: &str = "/dev/urandom";

/// Default listen port (the historical anerd port)
pub const DEFAULT_PORT: u16 = 26373;
