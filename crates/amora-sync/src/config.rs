//! Client configuration.

use std::time::Duration;

use crate::SyncError;

/// Remote origin used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Display name substituted for a counterpart whose profile is unavailable.
pub const PLACEHOLDER_NAME: &str = "Usuario";

/// Photo substituted for a counterpart whose profile is unavailable.
pub const PLACEHOLDER_PHOTO: &str = "https://via.placeholder.com/150";

// Validation bounds
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_ENRICHMENT_PARALLELISM: usize = 64;

/// Settings shared by every component of an [`AmoraClient`](crate::AmoraClient).
///
/// ```rust
/// use std::time::Duration;
/// use amora_sync::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("https://api.example.com/api/")
///     .request_timeout(Duration::from_secs(15))
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url, "https://api.example.com/api");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote origin every request path is appended to, without trailing slash.
    pub base_url: String,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    /// Time allowed for a whole request, connection included.
    pub request_timeout: Duration,

    /// Matches enriched at once during a matches refresh.
    pub enrichment_parallelism: usize,

    /// Counterpart name shown when the profile lookup fails.
    pub placeholder_name: String,

    /// Counterpart photo shown when the profile lookup fails.
    pub placeholder_photo: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            enrichment_parallelism: 8,
            placeholder_name: PLACEHOLDER_NAME.to_string(),
            placeholder_photo: PLACEHOLDER_PHOTO.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.is_empty() {
            return Err(SyncError::Validation("base URL cannot be empty".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SyncError::Validation(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        for (label, timeout) in [
            ("connect timeout", self.connect_timeout),
            ("request timeout", self.request_timeout),
        ] {
            let secs = timeout.as_secs();
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(SyncError::Validation(format!(
                    "{label} must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS} seconds"
                )));
            }
        }

        if self.enrichment_parallelism == 0
            || self.enrichment_parallelism > MAX_ENRICHMENT_PARALLELISM
        {
            return Err(SyncError::Validation(format!(
                "enrichment parallelism must be between 1 and {MAX_ENRICHMENT_PARALLELISM}"
            )));
        }

        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn enrichment_parallelism(mut self, parallelism: usize) -> Self {
        self.config.enrichment_parallelism = parallelism;
        self
    }

    pub fn placeholder(mut self, name: impl Into<String>, photo: impl Into<String>) -> Self {
        self.config.placeholder_name = name.into();
        self.config.placeholder_photo = photo.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<ClientConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.placeholder_name, "Usuario");
    }

    #[test]
    fn builder_trims_trailing_slashes() {
        let config = ClientConfig::builder()
            .base_url("http://10.0.2.2:8080/api//")
            .build()
            .unwrap();
        assert_eq!(config.base_url, "http://10.0.2.2:8080/api");
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(ClientConfig::builder().base_url("").build().is_err());
        assert!(ClientConfig::builder().base_url("ftp://x").build().is_err());
        assert!(
            ClientConfig::builder()
                .request_timeout(Duration::from_millis(200))
                .build()
                .is_err()
        );
        assert!(
            ClientConfig::builder()
                .enrichment_parallelism(0)
                .build()
                .is_err()
        );
        assert!(
            ClientConfig::builder()
                .enrichment_parallelism(65)
                .build()
                .is_err()
        );
    }
}
