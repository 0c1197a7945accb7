//! Container host provisioning.
//!
//! Issues the Cartel create call, recovers from answers that leave the
//! outcome unknown by looking the host up by name, and waits for the host to
//! reach `succeeded`. Any failure after the create call was made triggers a
//! compensating destroy so no half-built host is left behind.

use tracing::{error, info, warn};

use crate::cartel::{find_instance_by_name, CartelApi, CartelError, CreateRequest};
use crate::error::ProviderError;
use crate::wait::{wait_for_deployment, PollConfig};

/// A host that was created (or recovered) and reached `succeeded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedHost {
    pub instance_id: String,
    pub ip_address: String,
    /// The create call failed ambiguously and the host was found by name.
    pub recovered: bool,
    /// Deployment-state polls made before the host was ready.
    pub polls: u32,
}

/// Destroy `name_tag` after a failed create, logging rather than
/// propagating any failure.
pub async fn compensating_destroy(api: &dyn CartelApi, name_tag: &str) {
    warn!(name = %name_tag, "Destroying incompletely provisioned host");
    if let Err(e) = api.destroy(name_tag).await {
        error!(name = %name_tag, error = %e, "Compensating destroy failed");
    }
}

/// Create a host and wait until it is ready.
pub async fn provision_host(
    api: &dyn CartelApi,
    request: &CreateRequest,
    poll: &PollConfig,
) -> Result<ProvisionedHost, ProviderError> {
    let name = request.name_tag.as_str();
    info!(name = %name, instance_type = %request.instance_type, "Creating container host");

    let (instance_id, ip_address, recovered) = match api.create(request).await {
        Ok(created) => (created.instance_id, created.ip_address, false),
        Err(e) => match recover(api, name, e).await {
            Ok(details) => {
                info!(name = %name, instance_id = %details.instance_id, "Recovered host after ambiguous create failure");
                (details.instance_id, details.private_address, true)
            }
            Err(e) => {
                compensating_destroy(api, name).await;
                return Err(e);
            }
        },
    };

    match wait_for_deployment(api, name, poll).await {
        Ok(polls) => {
            info!(name = %name, instance_id = %instance_id, polls, "Container host ready");
            Ok(ProvisionedHost {
                instance_id,
                ip_address,
                recovered,
                polls,
            })
        }
        Err(e) => {
            compensating_destroy(api, name).await;
            Err(ProviderError::Provisioning(format!(
                "error waiting for instance '{}' to become ready: {}",
                instance_id, e
            )))
        }
    }
}

async fn recover(
    api: &dyn CartelApi,
    name: &str,
    err: CartelError,
) -> Result<crate::cartel::InstanceDetails, ProviderError> {
    let (status, description) = match &err {
        CartelError::Transport(_) => {
            return Err(ProviderError::Provisioning(format!(
                "create error (resp=nil): {}",
                err
            )))
        }
        CartelError::Status {
            status,
            description,
            ..
        } => (*status, description.clone()),
    };

    if !err.is_ambiguous() {
        return Err(ProviderError::Provisioning(format!(
            "create error (description=[{}], code=[{}]): {}",
            description.unwrap_or_default(),
            status,
            err
        )));
    }

    warn!(name = %name, status, error = %err, "Create outcome unknown, looking host up by name");
    find_instance_by_name(api, name).await.ok_or_else(|| {
        ProviderError::Provisioning(format!("create error (status={}): {}", status, err))
    })
}
