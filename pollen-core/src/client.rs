//! HTTP(S) client for fetching an exchange from a Pollen server
//!
//! The client sends a fresh random challenge, decodes whichever framing the server answers
//! with, verifies the challenge response when one is present, and writes the entropy into the
//! local pool device. There is no automatic retry: a failed exchange is reported to the caller.

use crate::{
    config::ClientConfig,
    encoder::{self, Decoded},
    mixer::Mixer,
    protocol::{ErrorPayload, RequestContext},
    sink,
    source::RandomSource,
    Error, Result,
};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Bytes of local randomness behind each generated challenge
const CHALLENGE_BYTES: usize = 32;

/// Client for one Pollen server
pub struct ExchangeClient {
    client: Client,
    config: ClientConfig,
    url: Url,
}

impl ExchangeClient {
    /// Create a new client with configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let url = config.url()?;

        if config.insecure_skip_verify {
            warn!(
                "TLS certificate verification is DISABLED for {}; the server is not authenticated",
                url
            );
        }
        if url.scheme() != "https" {
            warn!("Server URL {} is not HTTPS; exchanges travel in cleartext", url);
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .use_rustls_tls()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .user_agent(concat!("pollen-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Transport)?;

        Ok(Self {
            client,
            config,
            url,
        })
    }

    /// Fetch one exchange for the given request context
    #[instrument(skip(self, ctx), fields(url = %self.url))]
    pub async fn fetch(&self, ctx: &RequestContext) -> Result<Decoded> {
        let url = self.build_request_url(ctx);
        debug!("Requesting exchange from {}", self.url);

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Failed to reach {}: {}", self.url, e);
            Error::Transport(e)
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(Error::Transport)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorPayload>(&body)
                .map(|payload| payload.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            warn!("HTTP error {}: {}", status, message);
            return Err(if status == StatusCode::SERVICE_UNAVAILABLE {
                Error::EntropySourceUnavailable(message)
            } else {
                Error::Validation(format!("HTTP {}: {}", status, message))
            });
        }

        let decoded = encoder::decode(&body)?;
        verify_challenge(ctx, &decoded)?;

        debug!(
            "Received {} bytes ({:?} framing)",
            decoded.entropy().len(),
            decoded.mode()
        );
        Ok(decoded)
    }

    /// Fetch an exchange using a freshly generated challenge
    pub async fn exchange(&self) -> Result<Decoded> {
        let ctx = RequestContext::new(
            new_challenge()?,
            self.config.tag.clone().unwrap_or_default(),
        );
        self.fetch(&ctx).await
    }

    /// Fetch an exchange and write it into the local pool device
    ///
    /// Returns the number of bytes written.
    pub async fn run_once(&self) -> Result<usize> {
        let decoded = self.exchange().await?;
        let entropy = decoded.entropy();

        sink::write_device(&self.config.device_path, entropy).await?;
        info!(
            "Wrote {} bytes from {} to {}",
            entropy.len(),
            self.url,
            self.config.device_path.display()
        );
        Ok(entropy.len())
    }

    /// Build request URL with the non-empty context fields
    fn build_request_url(&self, ctx: &RequestContext) -> Url {
        let fields: Vec<(&str, &String)> = [
            ("challenge", &ctx.challenge),
            ("tag", &ctx.tag),
            ("uuid", &ctx.uuid),
            ("tip", &ctx.tip),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

        let mut url = self.url.clone();
        if !fields.is_empty() {
            url.query_pairs_mut().extend_pairs(fields);
        }
        url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Random hex challenge drawn from the local CSPRNG
fn new_challenge() -> Result<String> {
    Ok(hex::encode(RandomSource::os(4).draw(CHALLENGE_BYTES)?))
}

/// The first checkpoint of the server's chain covers the challenge alone
fn verify_challenge(ctx: &RequestContext, decoded: &Decoded) -> Result<()> {
    if let Decoded::ChallengeDigest {
        challenge_response, ..
    } = decoded
    {
        let mut mixer = Mixer::new();
        mixer.ingest(&ctx.challenge);
        if mixer.checkpoint().as_bytes().as_slice() != challenge_response.as_slice() {
            warn!("Server challenge response does not match the challenge sent");
            return Err(Error::ChallengeMismatch);
        }
    }
    Ok(())
}
