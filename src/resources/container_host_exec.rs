//! The `hsdp_container_host_exec` resource.
//!
//! Runs files and commands against a host that already exists. Nothing is
//! tracked remotely, so read and delete never leave the provider.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::bootstrap::{
    collect_files, file_block, run_bootstrap, BootstrapPlan, ProvisionFile, COMMANDS_FIELD,
    FILE_FIELD,
};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan::plan_resource;
use crate::schema::{has_errors, Attribute, Diagnostic, Schema};
use crate::ssh::{SshConnector, SshTarget};
use crate::state::{from_state, to_state};
use crate::types::{ApplyResult, PlanResult};
use crate::validation;

pub const RESOURCE_TYPE: &str = "hsdp_container_host_exec";

pub fn schema() -> Schema {
    Schema::v0()
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "host",
            Attribute::required_string()
                .with_force_new()
                .with_description("Address of the host to run on"),
        )
        .with_attribute("bastion_host", Attribute::optional_string())
        .with_attribute("user", Attribute::required_string())
        .with_attribute("private_key", Attribute::required_string().sensitive())
        .with_attribute(
            COMMANDS_FIELD,
            Attribute::optional_string_list()
                .with_max_items(10)
                .with_force_new(),
        )
        .with_block(FILE_FIELD, file_block().with_force_new())
        .with_attribute(
            "triggers",
            Attribute::optional_string_map()
                .with_force_new()
                .with_description("Arbitrary values that force a rerun when changed"),
        )
}

pub fn validate_config(config: &Value) -> Vec<Diagnostic> {
    validation::validate(&schema(), config)
}

pub fn plan(prior: Option<&Value>, proposed: Value) -> PlanResult {
    plan_resource(&schema(), prior, proposed, &[])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecState {
    pub id: String,
    pub host: String,
    pub bastion_host: String,
    pub user: String,
    pub private_key: String,
    pub commands: Vec<String>,
    pub file: Vec<ProvisionFile>,
    pub triggers: BTreeMap<String, String>,
}

/// Run the bootstrap. Any error leaves nothing in state.
pub async fn create(
    ssh: &dyn SshConnector,
    config: &ProviderConfig,
    default_bastion: &str,
    planned: Value,
) -> Result<ApplyResult, ProviderError> {
    let mut state: ExecState = from_state(planned)?;

    let (files, mut diags) = collect_files(&state.file).await;
    if has_errors(&diags) {
        return Ok(ApplyResult::new(Value::Null).with_diagnostics(diags));
    }

    let bastion = if state.bastion_host.is_empty() {
        default_bastion.to_string()
    } else {
        state.bastion_host.clone()
    };
    let bootstrap = BootstrapPlan {
        target: SshTarget {
            host: state.host.clone(),
            port: config.ssh_port,
            user: state.user.clone(),
            private_key: state.private_key.clone(),
            bastion: Some(bastion).filter(|b| !b.is_empty()),
        },
        files,
        commands: state.commands.clone(),
        command_timeout: config.command_timeout(),
    };

    diags.extend(run_bootstrap(ssh, &bootstrap).await);
    if has_errors(&diags) {
        warn!(host = %state.host, "Exec failed");
        return Ok(ApplyResult::new(Value::Null).with_diagnostics(diags));
    }

    state.id = uuid::Uuid::new_v4().to_string();
    info!(host = %state.host, id = %state.id, commands = state.commands.len(), "Exec completed");
    Ok(ApplyResult::new(to_state(&state)?).with_diagnostics(diags))
}

pub fn update(prior: Value, planned: Value) -> Result<ApplyResult, ProviderError> {
    let prior: ExecState = from_state(prior)?;
    let mut state: ExecState = from_state(planned)?;
    state.id = prior.id;
    Ok(ApplyResult::new(to_state(&state)?))
}
