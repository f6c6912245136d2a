//! Configuration for a registration attempt
//!
//! A [`RegistrationConfig`] is an immutable snapshot handed to a
//! [`RegistrationSession`](crate::RegistrationSession) when it is created.
//! Only the gateway URL, SIP domain and agent identifier are required; the
//! rest have defaults suitable for a WebRTC-style SIP gateway.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use wsreg_client_core::RegistrationConfig;
//!
//! let config = RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001")
//!     .with_origin("https://app.example.com")
//!     .with_expires(300)
//!     .with_register_timeout(Duration::from_secs(5));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.subprotocol.as_deref(), Some("sip"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsreg_sip_transport::{Endpoint, WsConfig};

use crate::error::{Error, Result};

/// Default REGISTER expiry in seconds
pub const DEFAULT_EXPIRES: u32 = 600;

/// Default time to wait for a SIP response
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Default WebSocket ping interval
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default `User-Agent` for both the upgrade request and the REGISTER
pub fn default_user_agent() -> String {
    format!("wsreg/{}", env!("CARGO_PKG_VERSION"))
}

/// Settings for one registration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Gateway URL, `wss://` or `ws://`
    pub ws_url: String,
    /// SIP domain; also the Request-URI host
    pub domain: String,
    /// User part of the address-of-record
    pub agent_id: String,
    /// `User-Agent` sent in the upgrade request and the REGISTER
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Optional `Origin` header for the upgrade request
    #[serde(default)]
    pub origin: Option<String>,
    /// Requested WebSocket subprotocol
    #[serde(default = "default_subprotocol")]
    pub subprotocol: Option<String>,
    /// Registration lease in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,
    /// `reg-id` Contact parameter
    #[serde(default = "default_reg_id")]
    pub reg_id: u32,
    /// Whether to advertise `+sip.ice` on the Contact
    #[serde(default = "default_ice_support")]
    pub ice_support: bool,
    /// How long to wait for any SIP response after starting
    #[serde(default = "default_register_timeout", with = "duration_secs")]
    pub register_timeout: Duration,
    /// WebSocket ping interval once the transport is open
    #[serde(default = "default_keepalive_interval", with = "duration_secs")]
    pub keepalive_interval: Duration,
}

fn default_subprotocol() -> Option<String> {
    Some(wsreg_sip_transport::transport::ws::SIP_SUBPROTOCOL.to_string())
}

fn default_expires() -> u32 {
    DEFAULT_EXPIRES
}

fn default_reg_id() -> u32 {
    1
}

fn default_ice_support() -> bool {
    true
}

fn default_register_timeout() -> Duration {
    DEFAULT_REGISTER_TIMEOUT
}

fn default_keepalive_interval() -> Duration {
    DEFAULT_KEEPALIVE_INTERVAL
}

impl RegistrationConfig {
    /// Create a configuration with default optional settings
    pub fn new(
        ws_url: impl Into<String>,
        domain: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            domain: domain.into(),
            agent_id: agent_id.into(),
            user_agent: default_user_agent(),
            origin: None,
            subprotocol: default_subprotocol(),
            expires: DEFAULT_EXPIRES,
            reg_id: default_reg_id(),
            ice_support: default_ice_support(),
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the upgrade request `Origin`
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set or clear the requested subprotocol
    pub fn with_subprotocol(mut self, subprotocol: Option<String>) -> Self {
        self.subprotocol = subprotocol;
        self
    }

    /// Set the registration lease in seconds
    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    /// Set the `reg-id` Contact parameter
    pub fn with_reg_id(mut self, reg_id: u32) -> Self {
        self.reg_id = reg_id;
        self
    }

    /// Enable or disable the `+sip.ice` Contact parameter
    pub fn with_ice_support(mut self, ice_support: bool) -> Self {
        self.ice_support = ice_support;
        self
    }

    /// Set the response timeout
    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Check that the configuration can drive a session
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::config("domain must not be empty"));
        }
        if self.agent_id.trim().is_empty() {
            return Err(Error::config("agent_id must not be empty"));
        }
        Endpoint::parse(&self.ws_url).map_err(|e| Error::config(e.to_string()))?;
        if self.expires == 0 {
            return Err(Error::config("expires must be greater than zero"));
        }
        if self.register_timeout.is_zero() {
            return Err(Error::config("register_timeout must be greater than zero"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(Error::config("keepalive_interval must be greater than zero"));
        }
        Ok(())
    }

    /// Transport settings derived from this configuration
    pub fn ws_config(&self) -> WsConfig {
        let mut config = WsConfig::new(self.ws_url.clone())
            .with_subprotocol(self.subprotocol.clone())
            .with_user_agent(self.user_agent.clone());
        if let Some(origin) = &self.origin {
            config = config.with_origin(origin.clone());
        }
        config
    }
}

/// Durations as whole seconds on the wire
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RegistrationConfig {
        RegistrationConfig::new("wss://gw.example.com/ws", "pbx.example.com", "1001")
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.expires, 600);
        assert_eq!(config.reg_id, 1);
        assert!(config.ice_support);
        assert_eq!(config.subprotocol.as_deref(), Some("sip"));
        assert_eq!(config.register_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("wsreg/"));
        assert!(config.origin.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(config().validate().is_ok());
        assert!(config().with_expires(0).validate().is_err());
        assert!(config()
            .with_register_timeout(Duration::ZERO)
            .validate()
            .is_err());

        let mut bad = config();
        bad.domain = "  ".into();
        assert!(matches!(bad.validate(), Err(Error::Config { .. })));

        let mut bad = config();
        bad.agent_id.clear();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.ws_url = "https://gw.example.com/ws".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_ws_config_carries_handshake_headers() {
        let ws = config()
            .with_origin("https://app.example.com")
            .with_user_agent("wsreg/1.0")
            .ws_config();
        assert_eq!(ws.url, "wss://gw.example.com/ws");
        assert_eq!(ws.origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(ws.user_agent.as_deref(), Some("wsreg/1.0"));
        assert_eq!(ws.subprotocol.as_deref(), Some("sip"));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let json = r#"{
            "ws_url": "wss://gw.example.com/ws",
            "domain": "pbx.example.com",
            "agent_id": "1001",
            "register_timeout": 3
        }"#;
        let config: RegistrationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.register_timeout, Duration::from_secs(3));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.expires, 600);
        assert!(config.ice_support);
    }
}
