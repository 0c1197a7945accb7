//! The `hsdp_container_host` resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bootstrap::{
    collect_files, file_block, run_bootstrap, validate_credentials, BootstrapPlan, ProvisionFile,
    COMMANDS_FIELD, FILE_FIELD,
};
use crate::cartel::{find_instance_by_id, CartelApi, CreateRequest, DeploymentState, InstanceDetails};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::provision::provision_host;
use crate::schema::{has_errors, Attribute, Diagnostic, Schema};
use crate::sets::{normalize_tags, reconcile, tag_change, without_base_group, BILLING_TAG};
use crate::ssh::{SshConnector, SshTarget};
use crate::state::{from_state, to_state};
use crate::types::{ApplyResult, ImportedResource, PlanResult};
use crate::validation;

pub const RESOURCE_TYPE: &str = "hsdp_container_host";

const MAX_TAGS: usize = 8;
const MAX_TAG_VALUE_LEN: usize = 255;
const SUPPRESSED: &[&str] = &["tags.billing"];

pub fn schema() -> Schema {
    Schema::new(3)
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Unique name tag of the host"),
        )
        .with_attribute(
            "instance_role",
            Attribute::optional_string()
                .with_force_new()
                .with_default(json!("container-host")),
        )
        .with_attribute(
            "instance_type",
            Attribute::optional_string()
                .with_force_new()
                .with_default(json!("m5.large")),
        )
        .with_attribute(
            "volume_type",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["iops"]),
        )
        .with_attribute(
            "iops",
            Attribute::optional_int64()
                .with_force_new()
                .with_int_range(1, 4000),
        )
        .with_attribute(
            "protect",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "encrypt_volumes",
            Attribute::optional_bool()
                .with_force_new()
                .with_default(json!(true)),
        )
        .with_attribute(
            "volumes",
            Attribute::optional_int64()
                .with_force_new()
                .with_default(json!(0))
                .with_int_range(0, 6),
        )
        .with_attribute(
            "volume_size",
            Attribute::optional_int64()
                .with_force_new()
                .with_default(json!(0))
                .with_int_range(0, 1000),
        )
        .with_attribute(
            "security_groups",
            Attribute::optional_string_set().with_max_items(5),
        )
        .with_attribute(
            "user_groups",
            Attribute::optional_string_set().with_max_items(50),
        )
        .with_attribute(
            "bastion_host",
            Attribute::optional_string()
                .with_description("Bastion used to reach the host; defaults to the Cartel bastion"),
        )
        .with_attribute(
            "user",
            Attribute::optional_string().with_required_with(&["private_key"]),
        )
        .with_attribute(
            "private_key",
            Attribute::optional_string()
                .sensitive()
                .with_required_with(&["user"]),
        )
        .with_attribute(
            COMMANDS_FIELD,
            Attribute::optional_string_list()
                .with_max_items(10)
                .with_description("Commands to run once the host is up"),
        )
        .with_block(FILE_FIELD, file_block())
        .with_attribute(
            "subnet_type",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_conflicts_with(&["subnet"]),
        )
        .with_attribute(
            "subnet",
            Attribute::optional_computed_string().with_force_new(),
        )
        .with_attribute("private_ip", Attribute::computed_string())
        .with_attribute("public_ip", Attribute::computed_string())
        .with_attribute("role", Attribute::computed_string())
        .with_attribute("vpc", Attribute::computed_string())
        .with_attribute("zone", Attribute::computed_string())
        .with_attribute("launch_time", Attribute::computed_string())
        .with_attribute("block_devices", Attribute::computed_string_set())
        .with_attribute(
            "tags",
            Attribute::optional_string_map().with_default(json!({ BILLING_TAG: "" })),
        )
}

/// Check the tag map: at most 8 entries, no `name` key, short string values.
pub fn validate_tags(tags: Option<&Value>) -> Vec<Diagnostic> {
    let error = |summary: String| vec![Diagnostic::error(summary).with_attribute("tags")];

    let map = match tags {
        None | Some(Value::Null) => return vec![],
        Some(Value::Object(map)) => map,
        Some(other) => return error(format!("expected {} to be a map", other)),
    };
    if map.len() > MAX_TAGS {
        return error(format!("maximum of {} tags are supported", MAX_TAGS));
    }

    let mut diags = Vec::new();
    for (key, value) in map {
        if key.eq_ignore_ascii_case("name") {
            return error(format!("tag \"{}\" is reserved by the Cartel API", key));
        }
        let Some(value) = value.as_str() else {
            return error(format!("tag \"{}\" value is of type {}", key, value));
        };
        if value.len() > MAX_TAG_VALUE_LEN {
            diags.push(
                Diagnostic::error("invalid tag value")
                    .with_detail(format!(
                        "value of tag \"{}\" is too long (max={})",
                        key, MAX_TAG_VALUE_LEN
                    ))
                    .with_attribute("tags"),
            );
        }
    }
    diags
}

pub fn validate_config(config: &Value) -> Vec<Diagnostic> {
    let mut diags = validation::validate(&schema(), config);
    diags.extend(validate_tags(config.get("tags")));
    diags
}

pub fn plan(prior: Option<&Value>, proposed: Value) -> PlanResult {
    plan_resource(&schema(), prior, proposed, SUPPRESSED)
}

/// Typed view of the resource state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerHostState {
    pub id: String,
    pub name: String,
    pub instance_role: String,
    pub instance_type: String,
    pub volume_type: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops: u32,
    pub protect: bool,
    pub encrypt_volumes: bool,
    pub volumes: u32,
    pub volume_size: u32,
    pub security_groups: Vec<String>,
    pub user_groups: Vec<String>,
    pub bastion_host: String,
    pub user: String,
    pub private_key: String,
    pub commands: Vec<String>,
    pub file: Vec<ProvisionFile>,
    pub subnet_type: String,
    pub subnet: String,
    pub private_ip: String,
    pub public_ip: String,
    pub role: String,
    pub vpc: String,
    pub zone: String,
    pub launch_time: String,
    pub block_devices: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl Default for ContainerHostState {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            instance_role: "container-host".to_string(),
            instance_type: "m5.large".to_string(),
            volume_type: String::new(),
            iops: 0,
            protect: false,
            encrypt_volumes: true,
            volumes: 0,
            volume_size: 0,
            security_groups: Vec::new(),
            user_groups: Vec::new(),
            bastion_host: String::new(),
            user: String::new(),
            private_key: String::new(),
            commands: Vec::new(),
            file: Vec::new(),
            subnet_type: String::new(),
            subnet: String::new(),
            private_ip: String::new(),
            public_ip: String::new(),
            role: String::new(),
            vpc: String::new(),
            zone: String::new(),
            launch_time: String::new(),
            block_devices: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}

impl ContainerHostState {
    fn create_request(&self) -> CreateRequest {
        CreateRequest {
            name_tag: self.name.clone(),
            instance_type: self.instance_type.clone(),
            instance_role: self.instance_role.clone(),
            volume_type: self.volume_type.clone(),
            iops: self.iops,
            number_of_volumes: self.volumes,
            volume_size: self.volume_size,
            encrypt_volumes: self.encrypt_volumes,
            protect: self.protect,
            security_groups: self.security_groups.clone(),
            user_groups: self.user_groups.clone(),
            subnet_type: if self.subnet_type.is_empty() {
                "private".to_string()
            } else {
                self.subnet_type.clone()
            },
            subnet: self.subnet.clone(),
            tags: self.request_tags(),
        }
    }

    /// Configured tags minus the empty billing placeholder the schema adds.
    fn request_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        if tags.get(BILLING_TAG).is_some_and(|v| v.is_empty()) {
            tags.remove(BILLING_TAG);
        }
        tags
    }

    /// Overwrite the remotely owned attributes with what Cartel reports.
    fn apply_details(&mut self, details: &InstanceDetails) {
        self.protect = details.protection;
        // The root volume is not one of the requested volumes.
        self.volumes = details.block_devices.len().saturating_sub(1) as u32;
        self.role = details.role.clone();
        self.instance_role = details.role.clone();
        self.launch_time = details.launch_time.clone();
        self.block_devices = details.block_devices.clone();
        self.security_groups = without_base_group(&details.security_groups);
        self.user_groups = details.ldap_groups.clone();
        self.instance_type = details.instance_type.clone();
        self.vpc = details.vpc.clone();
        self.zone = details.zone.clone();
        self.private_ip = details.private_address.clone();
        self.public_ip = details.public_address.clone();
        self.subnet = details.subnet.clone();
        self.subnet_type = if details.public_address.is_empty() {
            "private".to_string()
        } else {
            "public".to_string()
        };
        self.tags = normalize_tags(&details.tags);
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn check_identity(stored: &str, details: &InstanceDetails) -> Result<(), ProviderError> {
    if details.instance_id != stored {
        return Err(ProviderError::InstanceIdMismatch {
            stored: stored.to_string(),
            fetched: details.instance_id.clone(),
        });
    }
    Ok(())
}

pub async fn create(
    api: &dyn CartelApi,
    ssh: &dyn SshConnector,
    config: &ProviderConfig,
    planned: Value,
) -> Result<ApplyResult, ProviderError> {
    let mut state: ContainerHostState = from_state(planned)?;

    let (files, diags) = collect_files(&state.file).await;
    if has_errors(&diags) {
        warn!(name = %state.name, errors = diags.len(), "Rejecting file blocks");
        return Ok(ApplyResult::new(Value::Null).with_diagnostics(diags));
    }
    validate_credentials(&state.commands, &state.user, &state.private_key)?;

    let bastion = if state.bastion_host.is_empty() {
        api.bastion_host()
    } else {
        state.bastion_host.clone()
    };

    let host = provision_host(api, &state.create_request(), &config.poll_config()).await?;
    state.id = host.instance_id;

    let bootstrap = BootstrapPlan {
        target: SshTarget {
            host: host.ip_address,
            port: config.ssh_port,
            user: state.user.clone(),
            private_key: state.private_key.clone(),
            bastion: Some(bastion).filter(|b| !b.is_empty()),
        },
        files,
        commands: state.commands.clone(),
        command_timeout: config.command_timeout(),
    };
    let mut diags = run_bootstrap(ssh, &bootstrap).await;
    if has_errors(&diags) {
        warn!(name = %state.name, instance_id = %state.id, "Bootstrap failed, host kept for replacement");
        return Ok(ApplyResult::new(to_state(&state)?).with_diagnostics(diags));
    }

    match read(api, to_state(&state)?).await? {
        Some(refreshed) => Ok(ApplyResult::new(refreshed).with_diagnostics(diags)),
        None => {
            diags.push(Diagnostic::error(format!(
                "container host '{}' is no longer ready after provisioning",
                state.name
            )));
            Ok(ApplyResult::new(to_state(&state)?).with_diagnostics(diags))
        }
    }
}

pub async fn read(api: &dyn CartelApi, current: Value) -> Result<Option<Value>, ProviderError> {
    let mut state: ContainerHostState = from_state(current)?;

    if state.name.is_empty() {
        // Import: only the instance id is known.
        let found = find_instance_by_id(api, &state.id)
            .await
            .map_err(|e| ProviderError::api("get_all_instances", e))?;
        let Some(instance) = found else {
            debug!(instance_id = %state.id, "No host with this instance id");
            return Ok(None);
        };
        state.name = instance.name_tag;
        state.encrypt_volumes = true;
        state.volume_size = 0;
    }

    match api.get_deployment_state(&state.name).await {
        Ok(DeploymentState::Succeeded) => {}
        Ok(other) => {
            debug!(name = %state.name, state = %other, "Host not in succeeded state");
            return Ok(None);
        }
        Err(e) if e.status() == Some(400) => {
            debug!(name = %state.name, "Deployment state not found");
            return Ok(None);
        }
        Err(e) => return Err(ProviderError::api("get_deployment_state", e)),
    }

    let details = match api.get_details(&state.name).await {
        Ok(details) => details,
        Err(e) if matches!(e.status(), Some(400) | Some(404)) => {
            debug!(name = %state.name, error = %e, "Host details not found");
            return Ok(None);
        }
        Err(e) => return Err(ProviderError::api("get_details", e)),
    };
    check_identity(&state.id, &details)?;

    state.apply_details(&details);
    debug!(name = %state.name, instance_id = %state.id, "Read container host");
    Ok(Some(to_state(&state)?))
}

pub async fn update(
    api: &dyn CartelApi,
    prior: Value,
    planned: Value,
) -> Result<ApplyResult, ProviderError> {
    let old: ContainerHostState = from_state(prior)?;
    let mut new: ContainerHostState = from_state(planned)?;
    let name = new.name.clone();
    let targets = [name.clone()];

    let details = api
        .get_details(&name)
        .await
        .map_err(|e| ProviderError::api("get_details", e))?;
    check_identity(&old.id, &details)?;
    new.id = old.id.clone();

    if normalize_tags(&old.tags) != normalize_tags(&new.tags) {
        let change = tag_change(&old.tags, &new.tags);
        debug!(name = %name, ?change, "Updating tags");
        api.add_tags(&targets, &change)
            .await
            .map_err(|e| ProviderError::api("add_tags", e))?;
    }

    let user_groups = reconcile(&old.user_groups, &new.user_groups);
    if !user_groups.additions.is_empty() {
        api.add_user_groups(&targets, &user_groups.additions)
            .await
            .map_err(|e| ProviderError::api("add_user_groups", e))?;
    }
    if !user_groups.removals.is_empty() {
        api.remove_user_groups(&targets, &user_groups.removals)
            .await
            .map_err(|e| ProviderError::api("remove_user_groups", e))?;
    }

    let security_groups = reconcile(&old.security_groups, &new.security_groups);
    if !security_groups.additions.is_empty() {
        api.add_security_groups(&targets, &security_groups.additions)
            .await
            .map_err(|e| ProviderError::api("add_security_groups", e))?;
    }
    if !security_groups.removals.is_empty() {
        api.remove_security_groups(&targets, &security_groups.removals)
            .await
            .map_err(|e| ProviderError::api("remove_security_groups", e))?;
    }

    if old.protect != new.protect {
        api.set_protection(&name, new.protect)
            .await
            .map_err(|e| ProviderError::api("set_protection", e))?;
    }

    info!(name = %name, instance_id = %new.id, "Updated container host");
    Ok(ApplyResult::new(to_state(&new)?))
}

pub async fn delete(api: &dyn CartelApi, current: Value) -> Result<(), ProviderError> {
    let state: ContainerHostState = from_state(current)?;

    let details = api
        .get_details(&state.name)
        .await
        .map_err(|e| ProviderError::api("get_details", e))?;
    check_identity(&state.id, &details)?;

    api.destroy(&state.name)
        .await
        .map_err(|e| ProviderError::api("destroy", e))?;
    info!(name = %state.name, instance_id = %state.id, "Destroyed container host");
    Ok(())
}

pub async fn import(api: &dyn CartelApi, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
    match read(api, json!({ "id": id })).await? {
        Some(state) => Ok(vec![ImportedResource::new(RESOURCE_TYPE, state)]),
        None => Err(ProviderError::NotFound(format!(
            "container host with instance id '{}'",
            id
        ))),
    }
}
