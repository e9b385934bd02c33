//! Configuration management for Pollen components

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Response framing selected per deployment
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// `{"Size", "Encoding": "base64", "Data"}` over the raw draw
    Raw,
    /// `{"Format": "sha512", "Data"}` over the final seed digest
    Digest,
    /// Two hex lines: challenge response, then seed
    #[default]
    ChallengeDigest,
}

/// Pollen server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address for HTTP server
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Response framing
    #[serde(default)]
    pub response_mode: ResponseMode,

    /// Bytes drawn from the randomness source per request
    #[serde(default = "default_draw_size")]
    pub draw_size: usize,

    /// Upper bound on read attempts before a draw is declared failed
    #[serde(default = "default_max_draw_attempts")]
    pub max_draw_attempts: u32,

    /// Read randomness from this device instead of the OS CSPRNG
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// Entropy pool device receiving feedback writes
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,

    /// Pending feedback events before new ones are dropped
    #[serde(default = "default_feedback_queue_depth")]
    pub feedback_queue_depth: usize,

    /// Deployment-level request timeout in milliseconds (0 = none)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Serve HTTPS instead of plain HTTP
    #[serde(default)]
    pub tls_enabled: bool,

    /// PEM certificate chain (used when TLS is enabled)
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: PathBuf,

    /// PEM private key (used when TLS is enabled)
    #[serde(default = "default_tls_key_path")]
    pub tls_key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            response_mode: ResponseMode::default(),
            draw_size: default_draw_size(),
            max_draw_attempts: default_max_draw_attempts(),
            source_path: None,
            device_path: default_device_path(),
            feedback_queue_depth: default_feedback_queue_depth(),
            request_timeout_ms: default_request_timeout_ms(),
            metrics_enabled: true,
            tls_enabled: false,
            tls_cert_path: default_tls_cert_path(),
            tls_key_path: default_tls_key_path(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("POLLEN_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;

        if self.draw_size == 0 || self.draw_size > crate::MAX_DRAW_SIZE {
            return Err(Error::Config(format!(
                "draw_size must be between 1 and {}",
                crate::MAX_DRAW_SIZE
            )));
        }

        if self.max_draw_attempts == 0 {
            return Err(Error::Config("max_draw_attempts must be > 0".to_string()));
        }

        if self.feedback_queue_depth == 0 {
            return Err(Error::Config("feedback_queue_depth must be > 0".to_string()));
        }

        if self.device_path.as_os_str().is_empty() {
            return Err(Error::Config("device_path cannot be empty".to_string()));
        }

        if self.tls_enabled
            && (self.tls_cert_path.as_os_str().is_empty() || self.tls_key_path.as_os_str().is_empty())
        {
            return Err(Error::Config(
                "tls_cert_path and tls_key_path are required when TLS is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Replace the port of the listen address, keeping the host
    pub fn with_port(mut self, port: u16) -> Result<Self> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.listen_address = addr.to_string();
        Ok(self)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen_address '{}': {}", self.listen_address, e)))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms > 0 {
            Some(Duration::from_millis(self.request_timeout_ms))
        } else {
            None
        }
    }
}

/// Pollen client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// URL of the Pollen server
    pub server_url: String,

    /// Entropy pool device receiving the fetched bytes
    #[serde(default = "default_device_path")]
    pub device_path: PathBuf,

    /// Skip TLS certificate verification.
    ///
    /// SECURITY: this disables server authentication entirely. Off unless explicitly set.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Request timeout in milliseconds
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between exchanges (0 = run once)
    #[serde(default)]
    pub interval_secs: u64,

    /// Correlation tag sent with each request
    #[serde(default)]
    pub tag: Option<String>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            device_path: default_device_path(),
            insecure_skip_verify: false,
            timeout_ms: default_client_timeout_ms(),
            interval_secs: 0,
            tag: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("POLLEN_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.url()?;

        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be > 0".to_string()));
        }

        if self.device_path.as_os_str().is_empty() {
            return Err(Error::Config("device_path cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("Invalid server_url '{}': {}", self.server_url, e)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        if self.interval_secs > 0 {
            Some(Duration::from_secs(self.interval_secs))
        } else {
            None
        }
    }
}

// Default value functions
fn default_listen_address() -> String {
    format!("0.0.0.0:{}", crate::DEFAULT_PORT)
}

fn default_draw_size() -> usize {
    crate::DEFAULT_DRAW_SIZE
}

fn default_max_draw_attempts() -> u32 {
    16
}

fn default_device_path() -> PathBuf {
    PathBuf::from(crate::DEFAULT_DEVICE)
}

fn default_tls_cert_path() -> PathBuf {
    PathBuf::from("/etc/pollen/cert.pem")
}

fn default_tls_key_path() -> PathBuf {
    PathBuf::from("/etc/pollen/key.pem")
}

fn default_feedback_queue_depth() -> usize {
    1024
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_client_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_defaults_validate() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.response_mode, ResponseMode::ChallengeDigest);
        assert_eq!(config.draw_size, 64);
        assert_eq!(config.listen_addr().unwrap().port(), 26373);
        assert!(!config.tls_enabled);
        assert_eq!(config.tls_cert_path, PathBuf::from("/etc/pollen/cert.pem"));
        assert_eq!(config.tls_key_path, PathBuf::from("/etc/pollen/key.pem"));
    }

    #[test]
    fn test_tls_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tls_enabled: true\ntls_key_path: /srv/pollen/key.pem").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.tls_enabled);
        assert_eq!(config.tls_cert_path, PathBuf::from("/etc/pollen/cert.pem"));
        assert_eq!(config.tls_key_path, PathBuf::from("/srv/pollen/key.pem"));

        let config = ServerConfig {
            tls_enabled: true,
            tls_cert_path: PathBuf::new(),
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            draw_size: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ServerConfig {
            draw_size: crate::MAX_DRAW_SIZE + 1,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            max_draw_attempts: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            listen_address: "not an address".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_port() {
        let config = ServerConfig::default().with_port(8443).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:8443");
    }

    #[test]
    fn test_server_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen_address: 127.0.0.1:9000\nresponse_mode: raw\ndraw_size: 512\ndevice_path: /tmp/pool"
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.response_mode, ResponseMode::Raw);
        assert_eq!(config.draw_size, 512);
        assert_eq!(config.device_path, PathBuf::from("/tmp/pool"));
        assert_eq!(config.max_draw_attempts, 16);
    }

    #[test]
    fn test_client_config_validation() {
        let config = ClientConfig::new("https://pollen.example.com:26373/");
        assert!(config.validate().is_ok());
        assert!(!config.insecure_skip_verify);
        assert_eq!(config.interval(), None);

        let config = ClientConfig::new("::not a url::");
        assert!(config.validate().is_err());
    }
}
