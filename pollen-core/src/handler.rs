//! Per-request orchestration of an entropy exchange
//!
//! The handler drives one linear pass through the protocol:
//!
//! ```text
//! ReceivingRequest -> MixingChallenge -> DrawingEntropy -> MixingEntropy
//!                  -> Encoding -> Responding -> Done
//! ```
//!
//! Each request gets its own [`Mixer`]; the only shared resources are the pool sink and the
//! log stream. Pool feedback is interleaved with every checkpoint so each write carries a
//! fresh timestamp.

use crate::{
    config::ServerConfig,
    encoder::{self, EncodedResponse},
    mixer::Mixer,
    protocol::{Exchange, RequestContext},
    sink::{timestamp_nanos, PoolFeedback},
    source::RandomSource,
    ResponseMode, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Protocol states, traced at debug level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivingRequest,
    MixingChallenge,
    DrawingEntropy,
    MixingEntropy,
    Encoding,
    Responding,
    Done,
}

/// Transport details recorded in the audit log
#[derive(Debug, Clone, Default)]
pub struct Peer {
    pub remote_addr: String,
    pub user_agent: String,
}

impl Peer {
    pub fn new(remote_addr: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Frames a finished exchange
type EncodeFn = fn(ResponseMode, &Exchange) -> Result<EncodedResponse>;

/// Entropy exchange handler, parameterized by response framing
#[derive(Clone)]
pub struct ProtocolHandler {
    mode: ResponseMode,
    draw_size: usize,
    source: RandomSource,
    sink: Arc<dyn PoolFeedback>,
    encode: EncodeFn,
}

impl ProtocolHandler {
    pub fn new(
        mode: ResponseMode,
        draw_size: usize,
        source: RandomSource,
        sink: Arc<dyn PoolFeedback>,
    ) -> Self {
        Self {
            mode,
            draw_size,
            source,
            sink,
            encode: encoder::encode,
        }
    }

    /// Build a handler from server configuration and injected resources
    pub fn from_config(
        config: &ServerConfig,
        source: RandomSource,
        sink: Arc<dyn PoolFeedback>,
    ) -> Self {
        Self::new(config.response_mode, config.draw_size, source, sink)
    }

    #[cfg(test)]
    fn with_encoder(mut self, encode: EncodeFn) -> Self {
        self.encode = encode;
        self
    }

    pub fn source(&self) -> &RandomSource {
        &self.source
    }

    /// Run the hash chain for one request
    ///
    /// Ingestion order:
    /// - challenge framing: challenge, checkpoint, tag, checkpoint, draw, checkpoint
    /// - other framings: tag, checkpoint, tip, draw, checkpoint
    pub fn exchange(&self, ctx: &RequestContext, peer: &Peer) -> Result<Exchange> {
        let sink = self.sink.as_ref();
        let mut mixer = Mixer::new();

        debug!(stage = ?Stage::MixingChallenge, "Mixing request context");
        let challenge_response = if self.mode == ResponseMode::ChallengeDigest {
            sink.feed_timestamp();
            mixer.ingest(&ctx.challenge);
            sink.feed_timestamp();
            let challenge_response = mixer.checkpoint();
            sink.feed_timestamp();
            sink.feed(challenge_response.as_bytes().to_vec());
            Some(challenge_response)
        } else {
            sink.feed_timestamp();
            None
        };

        mixer.ingest(ctx.correlation_tag());
        let tag_digest = mixer.checkpoint();
        sink.feed_timestamp();
        sink.feed(tag_digest.as_bytes().to_vec());

        if challenge_response.is_none() {
            mixer.ingest(&ctx.tip);
        }

        info!(
            "Server received challenge from [{}, {}, {:x}] tip [{} bytes] at [{}]",
            peer.remote_addr,
            peer.user_agent,
            tag_digest,
            ctx.tip.len(),
            timestamp_nanos()
        );

        debug!(stage = ?Stage::DrawingEntropy, bytes = self.draw_size, "Drawing entropy");
        let draw = self.source.draw(self.draw_size)?;

        debug!(stage = ?Stage::MixingEntropy, "Mixing drawn entropy");
        mixer.ingest(&draw);
        let seed = mixer.checkpoint();
        sink.feed_timestamp();

        Ok(Exchange {
            challenge_response,
            tag_digest,
            seed,
            draw,
        })
    }

    /// Run a full exchange and frame the response
    ///
    /// The "sent" audit line is written only when encoding succeeds.
    pub fn handle(&self, ctx: &RequestContext, peer: &Peer) -> Result<EncodedResponse> {
        debug!(stage = ?Stage::ReceivingRequest, remote = %peer.remote_addr, "Request received");

        let exchange = self.exchange(ctx, peer)?;

        debug!(stage = ?Stage::Encoding, mode = ?self.mode, "Encoding response");
        let encoded = (self.encode)(self.mode, &exchange).map_err(|e| {
            warn!(
                "Failed to encode response for [{}, {}, {:x}]: {}",
                peer.remote_addr, peer.user_agent, exchange.tag_digest, e
            );
            e
        })?;

        debug!(stage = ?Stage::Responding, bytes = encoded.body.len(), "Response ready");
        info!(
            "Server sent response to [{}, {}, {:x}] at [{}]",
            peer.remote_addr,
            peer.user_agent,
            exchange.tag_digest,
            timestamp_nanos()
        );
        self.sink.feed_timestamp();

        debug!(stage = ?Stage::Done, "Exchange complete");
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{decode, Decoded};
    use crate::sink::MemorySink;
    use crate::source::{tests::ScriptedEntropy, EntropySource};
    use crate::Error;
    use proptest::prelude::*;
    use std::io;

    const CHALLENGE_RESPONSE_ABC: &str =
        "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
         2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f";
    const TAG_ABC_XYZ: &str =
        "f401ebaf5a46dd1b889edc6a905e5414e1ed6b434352edd978e87da64f70a527\
         097dcadeb8773ac89590fd4fab2d9217f17f4879793401fa4aa1509c219e3e33";
    const SEED_ABC_XYZ: &str =
        "7ac992dc85873fae81ef96df420ab883cc55d553778947d04e1c43d8facf5e1e\
         4c5d5c091dc7294ce693ff1131b1117d75558f3eee13ac2dfb3b33e43972fa06";
    const TAG_XYZ: &str =
        "4a3ed8147e37876adc8f76328e5abcc1b470e6acfc18efea0135f983604953a5\
         8e183c1a6086e91ba3e821d926f5fdeb37761c7ca0328a963f5e92870675b728";
    const SEED_XYZ_TIP: &str =
        "7d8861908cdff5da61fa3e71dec53ba2ba9c3f7f27c3a78b058aac0ab59ad734\
         d9045deb2abc44b5f81f59116a98de812741a49028ba3869f38c07273531baba";

    /// Backend that always yields the same byte
    struct ConstantEntropy(u8);

    impl EntropySource for ConstantEntropy {
        fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
            dest.fill(self.0);
            Ok(dest.len())
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    fn counting_draw() -> RandomSource {
        let script: Vec<u8> = (0..64).collect();
        RandomSource::new(Arc::new(ScriptedEntropy::new(&script, 64)), 4)
    }

    fn handler(mode: ResponseMode, source: RandomSource) -> (ProtocolHandler, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let handler = ProtocolHandler::new(mode, 64, source, sink.clone());
        (handler, sink)
    }

    #[test]
    fn test_challenge_regression_vector() {
        let (handler, _) = handler(ResponseMode::ChallengeDigest, counting_draw());
        let ctx = RequestContext::new("abc", "xyz");

        let encoded = handler.handle(&ctx, &Peer::default()).unwrap();
        let body = String::from_utf8(encoded.body).unwrap();
        assert_eq!(
            body,
            format!("{}\n{}\n", CHALLENGE_RESPONSE_ABC, SEED_ABC_XYZ)
        );
    }

    #[test]
    fn test_exchange_checkpoints_are_cumulative() {
        let (handler, _) = handler(ResponseMode::ChallengeDigest, counting_draw());
        let ctx = RequestContext::new("abc", "xyz");

        let exchange = handler.exchange(&ctx, &Peer::default()).unwrap();
        assert_eq!(
            exchange.challenge_response.unwrap().to_hex(),
            CHALLENGE_RESPONSE_ABC
        );
        assert_eq!(exchange.tag_digest.to_hex(), TAG_ABC_XYZ);
        assert_eq!(exchange.seed.to_hex(), SEED_ABC_XYZ);
        assert_eq!(exchange.draw, (0..64).collect::<Vec<u8>>());
    }

    #[test]
    fn test_digest_regression_vector() {
        let (handler, _) = handler(ResponseMode::Digest, counting_draw());
        let ctx = RequestContext {
            uuid: "xyz".to_string(),
            tip: "tip".to_string(),
            ..RequestContext::default()
        };

        let exchange = handler.exchange(&ctx, &Peer::default()).unwrap();
        assert!(exchange.challenge_response.is_none());
        assert_eq!(exchange.tag_digest.to_hex(), TAG_XYZ);
        assert_eq!(exchange.seed.to_hex(), SEED_XYZ_TIP);

        let encoded = encoder::encode(ResponseMode::Digest, &exchange).unwrap();
        assert_eq!(decode(&encoded.body).unwrap(), Decoded::Digest(exchange.seed.as_bytes().to_vec()));
    }

    #[test]
    fn test_raw_returns_draw() {
        let (handler, _) = handler(ResponseMode::Raw, counting_draw());
        let encoded = handler
            .handle(&RequestContext::default(), &Peer::default())
            .unwrap();

        assert_eq!(
            decode(&encoded.body).unwrap(),
            Decoded::Raw((0..64).collect())
        );
    }

    #[test]
    fn test_pool_feedback_sequence() {
        let (handler, sink) = handler(ResponseMode::ChallengeDigest, counting_draw());
        let ctx = RequestContext::new("abc", "xyz");
        handler.handle(&ctx, &Peer::default()).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 8);
        assert_eq!(hex::encode(&events[3]), CHALLENGE_RESPONSE_ABC);
        assert_eq!(hex::encode(&events[5]), TAG_ABC_XYZ);
        for i in [0, 1, 2, 4, 6, 7] {
            let text = std::str::from_utf8(&events[i]).unwrap();
            assert!(text.parse::<i64>().is_ok(), "event {} is not a timestamp", i);
        }
        // The seed is the response; it never goes into the local pool
        assert!(events.iter().all(|e| hex::encode(e) != SEED_ABC_XYZ));
    }

    #[test]
    fn test_unavailable_source_aborts() {
        let source = RandomSource::new(Arc::new(ScriptedEntropy::new(&[1, 2, 3], 3)), 2);
        let (handler, sink) = handler(ResponseMode::Digest, source);

        let result = handler.handle(&RequestContext::default(), &Peer::default());
        assert!(matches!(result, Err(Error::EntropySourceUnavailable(_))));
        // No trailing "sent" timestamp after a failed draw
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn test_encoding_failure_suppresses_sent() {
        fn failing_encode(_: ResponseMode, _: &Exchange) -> Result<EncodedResponse> {
            Err(Error::EncodingFailed("framing rejected".to_string()))
        }

        let (handler, sink) = handler(ResponseMode::ChallengeDigest, counting_draw());
        let handler = handler.with_encoder(failing_encode);

        let result = handler.handle(&RequestContext::new("abc", "xyz"), &Peer::default());
        assert!(matches!(result, Err(Error::EncodingFailed(_))));
        // Every exchange event is fed but the trailing "sent" timestamp is not
        let events = sink.events();
        assert_eq!(events.len(), 7);
        assert_eq!(hex::encode(&events[3]), CHALLENGE_RESPONSE_ABC);
        assert_eq!(hex::encode(&events[5]), TAG_ABC_XYZ);
    }

    #[test]
    fn test_independent_accumulators() {
        let (handler, _) = handler(ResponseMode::Digest, RandomSource::new(Arc::new(ConstantEntropy(7)), 1));
        let ctx = RequestContext::new("", "same");

        let first = handler.exchange(&ctx, &Peer::default()).unwrap();
        let second = handler.exchange(&ctx, &Peer::default()).unwrap();
        // Same inputs and same draw give the same seed only if no state leaks between requests
        assert_eq!(first.seed, second.seed);
    }

    proptest! {
        #[test]
        fn empty_fields_are_hashed(c in any::<u8>(), t in any::<u8>()) {
            let source = RandomSource::new(Arc::new(ConstantEntropy(0x5a)), 1);
            let (handler, _) = handler(ResponseMode::ChallengeDigest, source);
            let peer = Peer::default();

            let empty = handler.exchange(&RequestContext::default(), &peer).unwrap();
            let challenge = String::from_utf8(vec![c % 128]).unwrap();
            let tag = String::from_utf8(vec![t % 128]).unwrap();

            let with_challenge = handler.exchange(&RequestContext::new(challenge, ""), &peer).unwrap();
            prop_assert_ne!(empty.challenge_response, with_challenge.challenge_response);
            prop_assert_ne!(empty.seed, with_challenge.seed);

            let with_tag = handler.exchange(&RequestContext::new("", tag), &peer).unwrap();
            prop_assert_eq!(empty.challenge_response, with_tag.challenge_response);
            prop_assert_ne!(empty.tag_digest, with_tag.tag_digest);
            prop_assert_ne!(empty.seed, with_tag.seed);
        }
    }
}
