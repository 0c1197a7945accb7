//! The Cartel API seam.
//!
//! Cartel is the HSDP service that manages container hosts. This crate does
//! not ship a REST client for it; instead the provider talks to a
//! [`CartelApi`] obtained from a [`CartelConnector`], and an external client
//! library plugs in behind those traits. [`crate::testing::MockCartel`] is an
//! in-memory implementation for tests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CartelConfig;
use crate::error::ProviderError;

/// Lifecycle stage of a container host as reported by Cartel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeploymentState {
    /// The instance is being created.
    Provisioning,
    /// Cartel cannot tell yet; treated like provisioning.
    Indeterminate,
    /// The instance is up.
    Succeeded,
    /// Provisioning failed.
    Failed,
    /// The instance is gone.
    Terminated,
    /// The instance is being torn down.
    ShuttingDown,
    /// A state this crate does not know about.
    Unknown(String),
}

impl DeploymentState {
    /// The wire name of the state.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Indeterminate => "indeterminate",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::ShuttingDown => "shutting-down",
            Self::Unknown(s) => s,
        }
    }

    /// States that are still on their way to `succeeded`.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Indeterminate)
    }

    /// States from which the instance will never become usable.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Terminated | Self::ShuttingDown)
    }
}

impl FromStr for DeploymentState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "provisioning" => Self::Provisioning,
            "indeterminate" => Self::Indeterminate,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "terminated" => Self::Terminated,
            "shutting-down" => Self::ShuttingDown,
            other => Self::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a Cartel create call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub name_tag: String,
    pub instance_type: String,
    pub instance_role: String,
    pub volume_type: String,
    pub iops: u32,
    pub number_of_volumes: u32,
    pub volume_size: u32,
    pub encrypt_volumes: bool,
    pub protect: bool,
    pub security_groups: Vec<String>,
    pub user_groups: Vec<String>,
    pub subnet_type: String,
    pub subnet: String,
    pub tags: BTreeMap<String, String>,
}

/// What Cartel hands back from a successful create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInstance {
    pub instance_id: String,
    pub ip_address: String,
}

/// Details of a single container host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetails {
    pub instance_id: String,
    pub name_tag: String,
    pub private_address: String,
    pub public_address: String,
    pub role: String,
    pub instance_type: String,
    pub vpc: String,
    pub zone: String,
    pub subnet: String,
    pub launch_time: String,
    pub protection: bool,
    pub block_devices: Vec<String>,
    pub security_groups: Vec<String>,
    pub ldap_groups: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Errors returned by a [`CartelApi`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartelError {
    /// The request never produced a response.
    #[error("no response from Cartel: {0}")]
    Transport(String),

    /// Cartel answered with a failure status.
    ///
    /// `description` is the message Cartel put in the response body, if the
    /// body could be decoded at all.
    #[error("Cartel returned status {status}: {message}")]
    Status {
        status: u16,
        description: Option<String>,
        message: String,
    },
}

impl CartelError {
    /// Build a status error that carried a decodable body.
    pub fn rejected(status: u16, description: impl Into<String>) -> Self {
        let description = description.into();
        Self::Status {
            status,
            message: description.clone(),
            description: Some(description),
        }
    }

    /// Build a status error whose body could not be decoded.
    pub fn without_body(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            description: None,
            message: message.into(),
        }
    }

    /// The HTTP status, when there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(_) => None,
            Self::Status { status, .. } => Some(*status),
        }
    }

    /// Whether the request may have been accepted despite the error.
    ///
    /// Gateway timeouts and other 5xx answers, as well as failures without a
    /// readable body, leave the outcome unknown.
    pub fn is_ambiguous(&self) -> bool {
        match self {
            Self::Transport(_) => false,
            Self::Status {
                status,
                description,
                ..
            } => *status >= 500 || description.is_none(),
        }
    }
}

/// Container host operations the provider needs from Cartel.
#[async_trait::async_trait]
pub trait CartelApi: Send + Sync {
    /// Default bastion host for SSH access to this Cartel environment.
    fn bastion_host(&self) -> String;

    async fn create(&self, request: &CreateRequest) -> Result<CreatedInstance, CartelError>;

    async fn destroy(&self, name_tag: &str) -> Result<(), CartelError>;

    async fn get_details(&self, name_tag: &str) -> Result<InstanceDetails, CartelError>;

    async fn get_all_instances(&self) -> Result<Vec<InstanceDetails>, CartelError>;

    async fn get_deployment_state(&self, name_tag: &str) -> Result<DeploymentState, CartelError>;

    /// Set tags on the given hosts. An empty value removes the tag.
    async fn add_tags(
        &self,
        name_tags: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), CartelError>;

    async fn add_security_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError>;

    async fn remove_security_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError>;

    async fn add_user_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError>;

    async fn remove_user_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError>;

    async fn set_protection(&self, name_tag: &str, protect: bool) -> Result<(), CartelError>;
}

/// Builds a fresh [`CartelApi`] client for each provider operation.
pub trait CartelConnector: Send + Sync + 'static {
    fn connect(&self, config: &CartelConfig) -> Result<Arc<dyn CartelApi>, ProviderError>;
}

/// Find an instance by its name tag among all instances.
///
/// Lookup failures are treated as "not found".
pub async fn find_instance_by_name(api: &dyn CartelApi, name_tag: &str) -> Option<InstanceDetails> {
    match api.get_all_instances().await {
        Ok(instances) => instances.into_iter().find(|i| i.name_tag == name_tag),
        Err(e) => {
            tracing::debug!(name = %name_tag, error = %e, "Instance listing failed");
            None
        }
    }
}

/// Find an instance by its instance id among all instances.
pub async fn find_instance_by_id(
    api: &dyn CartelApi,
    instance_id: &str,
) -> Result<Option<InstanceDetails>, CartelError> {
    let instances = api.get_all_instances().await?;
    Ok(instances.into_iter().find(|i| i.instance_id == instance_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_state_parsing() {
        assert_eq!(
            "shutting-down".parse::<DeploymentState>().unwrap(),
            DeploymentState::ShuttingDown
        );
        assert_eq!(
            "rebooting".parse::<DeploymentState>().unwrap(),
            DeploymentState::Unknown("rebooting".to_string())
        );
        assert_eq!(DeploymentState::Indeterminate.to_string(), "indeterminate");
    }

    #[test]
    fn test_deployment_state_classes() {
        assert!(DeploymentState::Provisioning.is_pending());
        assert!(DeploymentState::Indeterminate.is_pending());
        assert!(!DeploymentState::Succeeded.is_pending());
        assert!(DeploymentState::Failed.is_terminal_failure());
        assert!(DeploymentState::Terminated.is_terminal_failure());
        assert!(DeploymentState::ShuttingDown.is_terminal_failure());
        assert!(!DeploymentState::Unknown("x".into()).is_terminal_failure());
    }

    #[test]
    fn test_ambiguous_errors() {
        assert!(CartelError::rejected(504, "gateway timeout").is_ambiguous());
        assert!(CartelError::without_body(400, "unreadable").is_ambiguous());
        assert!(!CartelError::rejected(400, "bad subnet").is_ambiguous());
        assert!(!CartelError::Transport("connection refused".into()).is_ambiguous());
        assert_eq!(CartelError::Transport("x".into()).status(), None);
        assert_eq!(CartelError::rejected(409, "taken").status(), Some(409));
    }
}
