//! Provider configuration.
//!
//! The provider block is decoded into [`ProviderConfig`]. Besides the Cartel
//! credentials it carries the tuning values for host provisioning: how long
//! to wait before the first deployment-state poll, how often to poll, how
//! long a create may take and how long each bootstrap command may run.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::state::from_state;
use crate::validation;
use crate::wait::PollConfig;

/// Seconds before the first deployment-state poll.
pub const DEFAULT_POLL_DELAY_SECS: u64 = 10;
/// Seconds between deployment-state polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
/// Seconds a create may spend waiting for the host.
pub const DEFAULT_CREATE_TIMEOUT_SECS: u64 = 30 * 60;
/// Seconds each bootstrap command may run.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 5 * 60;
/// SSH port on hosts and bastions.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Decoded provider block.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub region: String,
    pub environment: String,
    pub cartel_host: String,
    pub cartel_token: String,
    pub cartel_secret: String,
    pub cartel_no_tls: bool,
    pub cartel_skip_verify: bool,
    pub retry_max: u32,
    pub debug_log: String,
    pub poll_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub create_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub ssh_port: u16,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            environment: String::new(),
            cartel_host: String::new(),
            cartel_token: String::new(),
            cartel_secret: String::new(),
            cartel_no_tls: false,
            cartel_skip_verify: true,
            retry_max: 0,
            debug_log: String::new(),
            poll_delay_secs: DEFAULT_POLL_DELAY_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            create_timeout_secs: DEFAULT_CREATE_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            ssh_port: DEFAULT_SSH_PORT,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("region", &self.region)
            .field("environment", &self.environment)
            .field("cartel_host", &self.cartel_host)
            .field("cartel_token", &redact(&self.cartel_token))
            .field("cartel_secret", &redact(&self.cartel_secret))
            .field("cartel_no_tls", &self.cartel_no_tls)
            .field("cartel_skip_verify", &self.cartel_skip_verify)
            .field("retry_max", &self.retry_max)
            .field("debug_log", &self.debug_log)
            .field("poll_delay_secs", &self.poll_delay_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("create_timeout_secs", &self.create_timeout_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("ssh_port", &self.ssh_port)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

impl ProviderConfig {
    /// Decode the provider block sent by the host.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        from_state(value)
    }

    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "region",
                Attribute::optional_string().with_description("The HSDP region to configure for"),
            )
            .with_attribute(
                "environment",
                Attribute::optional_string()
                    .with_description("The HSDP environment to configure for")
                    .with_required_with(&["region"]),
            )
            .with_attribute(
                "cartel_host",
                Attribute::optional_string().with_description("The Cartel host"),
            )
            .with_attribute(
                "cartel_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("The Cartel token key")
                    .with_required_with(&["cartel_secret"]),
            )
            .with_attribute(
                "cartel_secret",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("The Cartel secret key")
                    .with_required_with(&["cartel_token"]),
            )
            .with_attribute(
                "cartel_no_tls",
                Attribute::optional_bool()
                    .with_default(json!(false))
                    .with_description("Disable TLS for Cartel"),
            )
            .with_attribute(
                "cartel_skip_verify",
                Attribute::optional_bool()
                    .with_default(json!(true))
                    .with_description("Skip certificate verification"),
            )
            .with_attribute(
                "retry_max",
                Attribute::optional_int64()
                    .with_default(json!(0))
                    .with_int_range(0, 100)
                    .with_description("Maximum number of retries for API requests"),
            )
            .with_attribute(
                "debug_log",
                Attribute::optional_string()
                    .with_description("The log file to write debugging output to"),
            )
            .with_attribute(
                "poll_delay_secs",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_POLL_DELAY_SECS))
                    .with_int_range(0, 3600)
                    .with_description("Seconds to wait before the first deployment state poll"),
            )
            .with_attribute(
                "poll_interval_secs",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_POLL_INTERVAL_SECS))
                    .with_int_range(0, 3600)
                    .with_description("Seconds between deployment state polls"),
            )
            .with_attribute(
                "create_timeout_secs",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_CREATE_TIMEOUT_SECS))
                    .with_int_range(1, 24 * 3600)
                    .with_description("Seconds a container host may take to become ready"),
            )
            .with_attribute(
                "command_timeout_secs",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_COMMAND_TIMEOUT_SECS))
                    .with_int_range(1, 24 * 3600)
                    .with_description("Seconds each bootstrap command may run"),
            )
            .with_attribute(
                "ssh_port",
                Attribute::optional_int64()
                    .with_default(json!(DEFAULT_SSH_PORT))
                    .with_int_range(1, 65535)
                    .with_description("SSH port of hosts and bastions"),
            )
    }

    /// Validate a raw provider block.
    pub fn validate(value: &Value) -> Vec<Diagnostic> {
        validation::validate(&Self::schema(), value)
    }

    /// Credentials and endpoint for building a Cartel client.
    pub fn cartel(&self) -> Result<CartelConfig, ProviderError> {
        if self.cartel_host.is_empty() {
            return Err(ProviderError::Configuration(
                "cartel_host must be set to manage container hosts".to_string(),
            ));
        }
        if self.cartel_token.is_empty() || self.cartel_secret.is_empty() {
            return Err(ProviderError::Configuration(
                "cartel_token and cartel_secret must be set to manage container hosts".to_string(),
            ));
        }
        Ok(CartelConfig {
            host: self.cartel_host.clone(),
            token: self.cartel_token.clone(),
            secret: self.cartel_secret.clone(),
            no_tls: self.cartel_no_tls,
            skip_verify: self.cartel_skip_verify,
            retry_max: self.retry_max,
            region: self.region.clone(),
            environment: self.environment.clone(),
        })
    }

    /// Deployment-state polling parameters for container host creation.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            delay: Duration::from_secs(self.poll_delay_secs),
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.create_timeout_secs),
        }
    }

    /// Per-command timeout for bootstrap commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Everything a Cartel client needs to talk to the API.
#[derive(Clone, PartialEq, Eq)]
pub struct CartelConfig {
    pub host: String,
    pub token: String,
    pub secret: String,
    pub no_tls: bool,
    pub skip_verify: bool,
    pub retry_max: u32,
    pub region: String,
    pub environment: String,
}

impl CartelConfig {
    /// Base URL of the Cartel API.
    pub fn base_url(&self) -> String {
        let scheme = if self.no_tls { "http" } else { "https" };
        format!("{}://{}", scheme, self.host)
    }
}

impl fmt::Debug for CartelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartelConfig")
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("secret", &redact(&self.secret))
            .field("no_tls", &self.no_tls)
            .field("skip_verify", &self.skip_verify)
            .field("retry_max", &self.retry_max)
            .field("region", &self.region)
            .field("environment", &self.environment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_block() {
        let config = ProviderConfig::from_value(json!({"cartel_host": null})).unwrap();
        assert_eq!(config.poll_delay_secs, 10);
        assert_eq!(config.poll_interval_secs, 3);
        assert_eq!(config.create_timeout_secs, 1800);
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
        assert!(config.cartel_skip_verify);
        assert_eq!(config.ssh_port, 22);
    }

    #[test]
    fn test_poll_config() {
        let config = ProviderConfig::from_value(json!({
            "poll_delay_secs": 0,
            "poll_interval_secs": 1,
            "create_timeout_secs": 60
        }))
        .unwrap();
        let poll = config.poll_config();
        assert_eq!(poll.delay, Duration::ZERO);
        assert_eq!(poll.interval, Duration::from_secs(1));
        assert_eq!(poll.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_cartel_requires_credentials() {
        let config = ProviderConfig::from_value(json!({"cartel_host": "cartel.example.com"})).unwrap();
        let err = config.cartel().unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let config = ProviderConfig::from_value(json!({
            "cartel_host": "cartel.example.com",
            "cartel_token": "token",
            "cartel_secret": "secret",
            "cartel_no_tls": true
        }))
        .unwrap();
        let cartel = config.cartel().unwrap();
        assert_eq!(cartel.base_url(), "http://cartel.example.com");
    }

    #[test]
    fn test_validate_paired_credentials() {
        let diags = ProviderConfig::validate(&json!({"cartel_token": "token"}));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("cartel_token"));

        let diags = ProviderConfig::validate(&json!({"environment": "client-test"}));
        assert_eq!(diags.len(), 1);

        assert!(ProviderConfig::validate(&json!({
            "region": "us-east",
            "environment": "client-test",
            "cartel_token": "token",
            "cartel_secret": "secret"
        }))
        .is_empty());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ProviderConfig {
            cartel_token: "token".into(),
            cartel_secret: "hunter2".into(),
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
