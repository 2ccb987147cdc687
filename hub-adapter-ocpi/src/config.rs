//! Configuration for the OCPI hub client
//!
//! Settings for outbound calls, command callbacks and ledger retention.

use std::str::FromStr;
use std::time::Duration;

use hub_core::executor::ExecutorConfig;
use hub_core::ledger::RetentionPolicy;
use hub_core::transport::DEFAULT_USER_AGENT;
use hub_core::TransportError;
use hub_core::{InterfaceRole, ModuleId, ProtocolVersion, StaticDirectory};
use thiserror::Error;
use url::Url;

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid callback base URL '{0}': {1}")]
    InvalidCallbackUrl(String, String),

    #[error("Receiver role path segment must be non-empty and contain no '/'")]
    InvalidRoleSegment,

    #[error("Default timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Invalid endpoint '{0}', expected MODULE:ROLE[@VERSION]=URL")]
    InvalidEndpoint(String),

    #[error("Cannot create HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

/// Complete client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Protocol version used for every call and callback URL
    pub version: ProtocolVersion,

    /// Timeout when a call does not specify one
    pub default_timeout: Duration,

    pub user_agent: String,

    /// Base of generated command callback URLs; when unset, the base URL
    /// of our own commands receiver endpoint in the directory is used
    pub callback_base_url: Option<String>,

    /// Path segment naming the receiver role in callback URLs
    pub receiver_role_segment: String,

    /// Static token sent as `Authorization: Token <token>`
    pub token: Option<String>,

    /// Ledger retention; `None` keeps every command forever
    pub retention: Option<RetentionPolicy>,

    /// How often the ledger sweeper runs when retention is set
    pub sweep_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::V2_2_1,
            default_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            callback_base_url: None,
            receiver_role_segment: "receiver".to_string(),
            token: None,
            retention: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_callback_base_url(mut self, url: impl Into<String>) -> Self {
        self.callback_base_url = Some(url.into());
        self
    }

    pub fn with_receiver_role_segment(mut self, segment: impl Into<String>) -> Self {
        self.receiver_role_segment = segment.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Enable periodic ledger sweeping
    pub fn with_retention(mut self, policy: RetentionPolicy, every: Duration) -> Self {
        self.retention = Some(policy);
        self.sweep_interval = every;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let segment = &self.receiver_role_segment;
        if segment.is_empty() || segment.contains('/') {
            return Err(ConfigError::InvalidRoleSegment);
        }

        if let Some(ref base) = self.callback_base_url {
            let url = Url::parse(base)
                .map_err(|e| ConfigError::InvalidCallbackUrl(base.clone(), e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidCallbackUrl(
                    base.clone(),
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
        }

        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_default_timeout(self.default_timeout)
            .with_user_agent(self.user_agent.clone())
    }
}

/// One directory entry in `MODULE:ROLE[@VERSION]=URL` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEntry {
    pub module: ModuleId,
    pub role: InterfaceRole,
    pub version: Option<ProtocolVersion>,
    pub url: String,
}

impl EndpointEntry {
    /// Register into `directory`, at `fallback` when no version was given
    pub fn register(&self, directory: &StaticDirectory, fallback: ProtocolVersion) {
        directory.register(
            self.module,
            self.role,
            self.version.unwrap_or(fallback),
            self.url.clone(),
        );
    }
}

impl FromStr for EndpointEntry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());

        let (key, url) = s.split_once('=').ok_or_else(invalid)?;
        let (module, role) = key.split_once(':').ok_or_else(invalid)?;
        let (role, version) = match role.split_once('@') {
            Some((role, version)) => (role, Some(version.parse().map_err(|_| invalid())?)),
            None => (role, None),
        };

        let url = url.trim();
        Url::parse(url).map_err(|_| invalid())?;

        Ok(Self {
            module: module.trim().parse().map_err(|_| invalid())?,
            role: role.trim().parse().map_err(|_| invalid())?,
            version,
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{EndpointDirectory, ModuleTarget};

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_version(ProtocolVersion::V2_2)
            .with_callback_base_url("https://hub.example/ocpi/commands")
            .with_token("secret")
            .with_default_timeout(Duration::from_secs(5));

        assert_eq!(config.version, ProtocolVersion::V2_2);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.executor_config().default_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ClientConfig::new().with_callback_base_url("ftp://hub.example/commands");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCallbackUrl(..))));

        let config = ClientConfig::new().with_receiver_role_segment("a/b");
        assert_eq!(config.validate(), Err(ConfigError::InvalidRoleSegment));

        let config = ClientConfig::new().with_default_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_endpoint_entry_parsing() {
        let entry: EndpointEntry = "locations:SENDER=https://cpo.example/ocpi/2.2.1/locations"
            .parse()
            .unwrap();
        assert_eq!(entry.module, ModuleId::Locations);
        assert_eq!(entry.role, InterfaceRole::Sender);
        assert_eq!(entry.version, None);

        let entry: EndpointEntry = "commands:receiver@2.1.1=https://cpo.example/commands"
            .parse()
            .unwrap();
        assert_eq!(entry.version, Some(ProtocolVersion::V2_1_1));

        let directory = StaticDirectory::new();
        entry.register(&directory, ProtocolVersion::V2_2_1);
        let pinned =
            ModuleTarget::receiver(ModuleId::Commands).with_version(ProtocolVersion::V2_1_1);
        assert!(directory.resolve(&pinned).is_some());
    }

    #[test]
    fn test_endpoint_entry_rejects_garbage() {
        for bad in ["locations=https://a", "nope:SENDER=https://a", "locations:SENDER=not a url"] {
            assert!(bad.parse::<EndpointEntry>().is_err(), "{}", bad);
        }
    }
}
