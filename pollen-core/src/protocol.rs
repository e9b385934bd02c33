// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Protocol data structures for entropy exchange
//!
//! Defines the request context read from form/query fields and the JSON payloads returned by
//! the raw and digest framings. Field names on the wire are capitalized for compatibility with
//! existing anerd/pollen clients.

use crate::mixer::Digest;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Client-supplied request fields
///
/// Every field is optional and defaults to the empty string. Absent fields are still ingested
/// by the mixer as empty input.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RequestContext {
    /// String the client can later match against the challenge response
    #[serde(default)]
    pub challenge: String,

    /// Correlation tag
    #[serde(default)]
    pub tag: String,

    /// Legacy spelling of `tag`
    #[serde(default)]
    pub uuid: String,

    /// Bytes donated by the client
    #[serde(default)]
    pub tip: String,
}

impl RequestContext {
    pub fn new(challenge: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            challenge: challenge.into(),
            tag: tag.into(),
            ..Self::default()
        }
    }

    /// Read the fields from a urlencoded request body and query string
    ///
    /// Body values take precedence over the query string and the first value of a repeated
    /// key wins. Unknown keys are ignored and nothing is ever rejected.
    pub fn from_form(query: Option<&str>, body: &[u8]) -> Self {
        let mut ctx = Self::default();
        let mut seen = [false; 4];

        let pairs = form_urlencoded::parse(body)
            .chain(form_urlencoded::parse(query.unwrap_or_default().as_bytes()));
        for (key, value) in pairs {
            let (slot, field) = match key.as_ref() {
                "challenge" => (0, &mut ctx.challenge),
                "tag" => (1, &mut ctx.tag),
                "uuid" => (2, &mut ctx.uuid),
                "tip" => (3, &mut ctx.tip),
                _ => continue,
            };
            if !seen[slot] {
                seen[slot] = true;
                *field = value.into_owned();
            }
        }

        ctx
    }

    /// Effective correlation tag: `tag`, falling back to `uuid`
    pub fn correlation_tag(&self) -> &str {
        if self.tag.is_empty() {
            &self.uuid
        } else {
            &self.tag
        }
    }
}

/// Raw framing: base64 of the drawn bytes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawPayload {
    #[serde(rename = "Size")]
    pub size: usize,

    #[serde(rename = "Encoding")]
    pub encoding: String,

    #[serde(rename = "Data")]
    pub data: String,
}

impl RawPayload {
    pub const ENCODING: &'static str = "base64";
}

/// Digest framing: hex of the final seed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigestPayload {
    #[serde(rename = "Format")]
    pub format: String,

    #[serde(rename = "Data")]
    pub data: String,
}

impl DigestPayload {
    pub const FORMAT: &'static str = "sha512";
}

/// Error body returned when an exchange fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub error: String,
    pub message: String,
}

impl From<&crate::Error> for ErrorPayload {
    fn from(e: &crate::Error) -> Self {
        Self {
            error: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Everything one exchange produced
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Digest of the challenge alone (challenge framing only)
    pub challenge_response: Option<Digest>,

    /// Digest after the correlation tag, used in audit logs
    pub tag_digest: Digest,

    /// Final digest after the draw
    pub seed: Digest,

    /// The freshly drawn bytes
    pub draw: Vec<u8>,
}
