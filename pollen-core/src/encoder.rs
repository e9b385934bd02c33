//! Response framing and decoding
//!
//! Three mutually exclusive framings, selected by [`ResponseMode`]. Encoding either produces a
//! complete body or fails; there is no partial output.

use crate::{
    mixer::DIGEST_LEN,
    protocol::{DigestPayload, Exchange, RawPayload},
    Error, ResponseMode, Result,
};
use base64::{engine::general_purpose::STANDARD, Engine};

/// A framed response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedResponse {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Frame an exchange for the wire
pub fn encode(mode: ResponseMode, exchange: &Exchange) -> Result<EncodedResponse> {
    match mode {
        ResponseMode::Raw => {
            let payload = RawPayload {
                size: exchange.draw.len(),
                encoding: RawPayload::ENCODING.to_string(),
                data: STANDARD.encode(&exchange.draw),
            };
            Ok(EncodedResponse {
                body: serde_json::to_vec(&payload)?,
                content_type: JSON,
            })
        }
        ResponseMode::Digest => {
            let payload = DigestPayload {
                format: DigestPayload::FORMAT.to_string(),
                data: exchange.seed.to_hex(),
            };
            Ok(EncodedResponse {
                body: serde_json::to_vec(&payload)?,
                content_type: JSON,
            })
        }
        ResponseMode::ChallengeDigest => {
            let challenge_response = exchange.challenge_response.ok_or_else(|| {
                Error::EncodingFailed("exchange has no challenge response".to_string())
            })?;
            let body = format!("{:x}\n{:x}\n", challenge_response, exchange.seed);
            Ok(EncodedResponse {
                body: body.into_bytes(),
                content_type: TEXT,
            })
        }
    }
}

/// A response body decoded back into bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Raw(Vec<u8>),
    Digest(Vec<u8>),
    ChallengeDigest {
        challenge_response: Vec<u8>,
        seed: Vec<u8>,
    },
}

impl Decoded {
    /// Framing the body was sent with
    pub fn mode(&self) -> ResponseMode {
        match self {
            Decoded::Raw(_) => ResponseMode::Raw,
            Decoded::Digest(_) => ResponseMode::Digest,
            Decoded::ChallengeDigest { .. } => ResponseMode::ChallengeDigest,
        }
    }

    /// Bytes destined for the local pool
    pub fn entropy(&self) -> &[u8] {
        match self {
            Decoded::Raw(data) | Decoded::Digest(data) => data,
            Decoded::ChallengeDigest { seed, .. } => seed,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum JsonBody {
    Raw(RawPayload),
    Digest(DigestPayload),
}

/// Decode any of the three framings, detecting which one was used
pub fn decode(body: &[u8]) -> Result<Decoded> {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let trimmed = &body[start..];
    if trimmed.first() == Some(&b'{') {
        return match serde_json::from_slice::<JsonBody>(trimmed)? {
            JsonBody::Raw(raw) => decode_raw(raw),
            JsonBody::Digest(digest) => decode_digest(digest),
        };
    }

    let text = std::str::from_utf8(body)
        .map_err(|e| Error::EncodingFailed(format!("Body is not UTF-8: {}", e)))?;
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    match (lines.next(), lines.next(), lines.next()) {
        (Some(challenge_response), Some(seed), None) => Ok(Decoded::ChallengeDigest {
            challenge_response: decode_digest_hex(challenge_response)?,
            seed: decode_digest_hex(seed)?,
        }),
        _ => Err(Error::EncodingFailed(
            "expected two hex digest lines".to_string(),
        )),
    }
}

fn decode_raw(raw: RawPayload) -> Result<Decoded> {
    if raw.encoding != RawPayload::ENCODING {
        return Err(Error::EncodingFailed(format!(
            "unsupported encoding '{}'",
            raw.encoding
        )));
    }
    let data = STANDARD.decode(&raw.data)?;
    if data.len() != raw.size {
        return Err(Error::EncodingFailed(format!(
            "declared {} bytes, decoded {}",
            raw.size,
            data.len()
        )));
    }
    Ok(Decoded::Raw(data))
}

fn decode_digest(digest: DigestPayload) -> Result<Decoded> {
    if digest.format != DigestPayload::FORMAT {
        return Err(Error::EncodingFailed(format!(
            "unsupported format '{}'",
            digest.format
        )));
    }
    Ok(Decoded::Digest(decode_digest_hex(&digest.data)?))
}

fn decode_digest_hex(s: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(s)?;
    if bytes.len() != DIGEST_LEN {
        return Err(Error::EncodingFailed(format!(
            "digest is {} bytes, expected {}",
            bytes.len(),
            DIGEST_LEN
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::Mixer;

    fn exchange(challenge: Option<&str>) -> Exchange {
        let mut mixer = Mixer::new();
        let challenge_response = challenge.map(|c| {
            mixer.ingest(c);
            mixer.checkpoint()
        });
        mixer.ingest("tag");
        let tag_digest = mixer.checkpoint();
        let draw: Vec<u8> = (0..64).collect();
        mixer.ingest(&draw);
        Exchange {
            challenge_response,
            tag_digest,
            seed: mixer.checkpoint(),
            draw,
        }
    }

    #[test]
    fn test_raw_schema() {
        let encoded = encode(ResponseMode::Raw, &exchange(None)).unwrap();
        assert_eq!(encoded.content_type, "application/json");

        let value: serde_json::Value = serde_json::from_slice(&encoded.body).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["Size"], 64);
        assert_eq!(object["Encoding"], "base64");

        let data = STANDARD.decode(object["Data"].as_str().unwrap()).unwrap();
        assert_eq!(data, (0..64).collect::<Vec<u8>>());
    }

    #[test]
    fn test_digest_schema() {
        let exchange = exchange(None);
        let encoded = encode(ResponseMode::Digest, &exchange).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&encoded.body).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["Format"], "sha512");
        assert_eq!(object["Data"], exchange.seed.to_hex());
    }

    #[test]
    fn test_challenge_digest_body() {
        let exchange = exchange(Some("abc"));
        let encoded = encode(ResponseMode::ChallengeDigest, &exchange).unwrap();
        assert_eq!(encoded.content_type, "text/plain; charset=utf-8");

        let body = String::from_utf8(encoded.body).unwrap();
        let lines: Vec<&str> = body.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 128);
        assert_eq!(lines[1], exchange.seed.to_hex());
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_challenge_digest_requires_challenge_response() {
        let result = encode(ResponseMode::ChallengeDigest, &exchange(None));
        assert!(matches!(result, Err(Error::EncodingFailed(_))));
    }

    #[test]
    fn test_decode_detects_framing() {
        for mode in [ResponseMode::Raw, ResponseMode::Digest, ResponseMode::ChallengeDigest] {
            let exchange = exchange(Some("abc"));
            let encoded = encode(mode, &exchange).unwrap();
            let decoded = decode(&encoded.body).unwrap();

            assert_eq!(decoded.mode(), mode);
            match mode {
                ResponseMode::Raw => assert_eq!(decoded.entropy(), exchange.draw.as_slice()),
                _ => assert_eq!(decoded.entropy(), exchange.seed.as_bytes()),
            }
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode(b"").is_err());
        assert!(decode(b"not hex\nstill not hex\n").is_err());
        assert!(decode(b"abcd\nabcd\n").is_err());
        assert!(decode(br#"{"Size":5,"Encoding":"base64","Data":"AAECAw=="}"#).is_err());
        assert!(decode(br#"{"Size":4,"Encoding":"base32","Data":"AAECAw=="}"#).is_err());
        assert!(decode(br#"{"Format":"md5","Data":"00"}"#).is_err());
        assert!(decode(br#"{"Unknown":1}"#).is_err());
    }
}
