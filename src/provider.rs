//! The HSDP provider: dispatches host requests to the resource modules.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::cartel::{CartelApi, CartelConnector};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::logging::try_init_debug_log;
use crate::resources::{container_host, container_host_exec};
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::ssh::{RusshConnector, SshConnector};
use crate::types::{ApplyResult, ImportedResource, PlanResult};

/// Provider for HSDP container hosts.
pub struct HsdpProvider {
    cartel: Arc<dyn CartelConnector>,
    ssh: Arc<dyn SshConnector>,
    config: RwLock<Option<ProviderConfig>>,
}

impl HsdpProvider {
    /// Create a provider that reaches Cartel through `cartel` and hosts over russh.
    pub fn new(cartel: Arc<dyn CartelConnector>) -> Self {
        Self {
            cartel,
            ssh: Arc::new(RusshConnector::default()),
            config: RwLock::new(None),
        }
    }

    /// Replace the SSH connector.
    pub fn with_ssh(mut self, ssh: Arc<dyn SshConnector>) -> Self {
        self.ssh = ssh;
        self
    }

    async fn config(&self) -> Result<ProviderConfig, ProviderError> {
        self.config.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    async fn cartel_api(&self) -> Result<(ProviderConfig, Arc<dyn CartelApi>), ProviderError> {
        let config = self.config().await?;
        let api = self.cartel.connect(&config.cartel()?)?;
        Ok((config, api))
    }

    /// Cartel's bastion when Cartel is configured, otherwise none.
    fn default_bastion(&self, config: &ProviderConfig) -> String {
        let Ok(cartel) = config.cartel() else {
            return String::new();
        };
        match self.cartel.connect(&cartel) {
            Ok(api) => api.bastion_host(),
            Err(e) => {
                debug!(error = %e, "No Cartel client for bastion lookup");
                String::new()
            }
        }
    }
}

fn unknown(resource_type: &str) -> ProviderError {
    ProviderError::UnknownResource(resource_type.to_string())
}

#[async_trait::async_trait]
impl ProviderService for HsdpProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(container_host::RESOURCE_TYPE, container_host::schema())
            .with_resource(
                container_host_exec::RESOURCE_TYPE,
                container_host_exec::schema(),
            )
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(ProviderConfig::validate(&config))
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diags = ProviderConfig::validate(&config);
        if has_errors(&diags) {
            return Ok(diags);
        }
        let parsed = ProviderConfig::from_value(config)?;

        if !parsed.debug_log.is_empty() {
            match try_init_debug_log(&parsed.debug_log) {
                Ok(true) => debug!(path = %parsed.debug_log, "Debug log enabled"),
                Ok(false) => debug!("Logging already initialized, debug_log ignored"),
                Err(e) => {
                    warn!(path = %parsed.debug_log, error = %e, "Cannot open debug log");
                    diags.push(
                        Diagnostic::warning("debug_log could not be opened")
                            .with_detail(format!("{}: {}", parsed.debug_log, e))
                            .with_attribute("debug_log"),
                    );
                }
            }
        }

        info!(region = %parsed.region, environment = %parsed.environment, "Provider configured");
        *self.config.write().await = Some(parsed);
        Ok(diags)
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => Ok(container_host::validate_config(&config)),
            container_host_exec::RESOURCE_TYPE => Ok(container_host_exec::validate_config(&config)),
            other => Err(unknown(other)),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                Ok(container_host::plan(prior_state.as_ref(), proposed_state))
            }
            container_host_exec::RESOURCE_TYPE => {
                Ok(container_host_exec::plan(prior_state.as_ref(), proposed_state))
            }
            other => Err(unknown(other)),
        }
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<ApplyResult, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                let (config, api) = self.cartel_api().await?;
                container_host::create(api.as_ref(), self.ssh.as_ref(), &config, planned_state)
                    .await
            }
            container_host_exec::RESOURCE_TYPE => {
                let config = self.config().await?;
                let bastion = self.default_bastion(&config);
                container_host_exec::create(self.ssh.as_ref(), &config, &bastion, planned_state)
                    .await
            }
            other => Err(unknown(other)),
        }
    }

    #[instrument(skip(self, current_state))]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                let (_, api) = self.cartel_api().await?;
                container_host::read(api.as_ref(), current_state).await
            }
            container_host_exec::RESOURCE_TYPE => Ok(Some(current_state)),
            other => Err(unknown(other)),
        }
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                let (_, api) = self.cartel_api().await?;
                container_host::update(api.as_ref(), prior_state, planned_state).await
            }
            container_host_exec::RESOURCE_TYPE => {
                container_host_exec::update(prior_state, planned_state)
            }
            other => Err(unknown(other)),
        }
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                let (_, api) = self.cartel_api().await?;
                container_host::delete(api.as_ref(), current_state).await
            }
            container_host_exec::RESOURCE_TYPE => Ok(()),
            other => Err(unknown(other)),
        }
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        match resource_type {
            container_host::RESOURCE_TYPE => {
                let (_, api) = self.cartel_api().await?;
                container_host::import(api.as_ref(), id).await
            }
            other => Err(ProviderError::FailedPrecondition(format!(
                "Import not supported for resource type: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartel::{CartelError, InstanceDetails};
    use crate::testing::{
        assert_has_errors, assert_plan_creates, assert_plan_replaces, MockCartel, MockSsh,
        ProviderTester, TestError,
    };
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn provider_config() -> Value {
        json!({
            "cartel_host": "cartel.example.com",
            "cartel_token": "token",
            "cartel_secret": "secret",
            "poll_delay_secs": 0,
            "poll_interval_secs": 0
        })
    }

    async fn tester(cartel: &MockCartel, ssh: &MockSsh) -> ProviderTester<HsdpProvider> {
        let provider =
            HsdpProvider::new(Arc::new(cartel.clone())).with_ssh(Arc::new(ssh.clone()));
        let tester = ProviderTester::new(provider);
        assert_ok!(tester.configure(provider_config()).await);
        tester
    }

    #[test]
    fn test_schema_lists_resources() {
        let provider = HsdpProvider::new(Arc::new(MockCartel::new()));
        let tester = ProviderTester::new(provider);
        assert_eq!(
            tester.resource_types(),
            vec!["hsdp_container_host", "hsdp_container_host_exec"]
        );
        assert_eq!(tester.schema().resources["hsdp_container_host"].version, 3);
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let provider = HsdpProvider::new(Arc::new(MockCartel::new()));
        let err = provider
            .read("hsdp_container_host", json!({"id": "i-1", "name": "host-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_rejects_half_credentials() {
        let provider = HsdpProvider::new(Arc::new(MockCartel::new()));
        let diags = provider
            .configure(json!({"cartel_host": "cartel", "cartel_token": "t"}))
            .await
            .unwrap();
        assert_has_errors(&diags);
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let tester = tester(&MockCartel::new(), &MockSsh::new()).await;
        let err = tester.read("hsdp_nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
        assert_err!(tester.import_resource("hsdp_container_host_exec", "x").await);
    }

    #[tokio::test]
    async fn test_container_host_lifecycle() {
        let cartel = MockCartel::new();
        let ssh = MockSsh::new();
        let tester = tester(&cartel, &ssh).await;

        let plan = tester
            .plan_create("hsdp_container_host", json!({"name": "host-1"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        let state = tester
            .lifecycle_crud(
                "hsdp_container_host",
                json!({"name": "host-1", "tags": {"env": "dev"}}),
                json!({"name": "host-1", "tags": {"env": "prod"}, "user_groups": ["devs"]}),
            )
            .await
            .unwrap();

        assert_eq!(state["tags"], json!({"env": "prod"}));
        assert_eq!(state["user_groups"], json!(["devs"]));
        assert_eq!(cartel.count("create"), 1);
        assert_eq!(cartel.count("add_tags"), 1);
        assert_eq!(cartel.count("destroy"), 1);
        assert!(cartel.instance("host-1").is_none());
    }

    #[tokio::test]
    async fn test_replacement_on_instance_type() {
        let cartel = MockCartel::new();
        let tester = tester(&cartel, &MockSsh::new()).await;

        let state = tester
            .lifecycle_create("hsdp_container_host", json!({"name": "host-1"}))
            .await
            .unwrap();
        let plan = tester
            .plan_update(
                "hsdp_container_host",
                state,
                json!({"name": "host-1", "instance_type": "m5.xlarge"}),
            )
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_create_with_commands_needs_credentials() {
        let cartel = MockCartel::new();
        let tester = tester(&cartel, &MockSsh::new()).await;

        let result = tester
            .lifecycle_create(
                "hsdp_container_host",
                json!({"name": "host-1", "commands": ["docker ps"]}),
            )
            .await;
        assert!(matches!(
            result,
            Err(TestError::Provider(ProviderError::Validation(_)))
        ));
        assert_eq!(cartel.count("create"), 0);
    }

    #[tokio::test]
    async fn test_drifted_instance_is_refused() {
        let cartel = MockCartel::new().with_instance(InstanceDetails {
            instance_id: "i-2".into(),
            name_tag: "host-1".into(),
            ..Default::default()
        });
        let tester = tester(&cartel, &MockSsh::new()).await;
        let stored = json!({"id": "i-1", "name": "host-1"});

        let err = tester
            .read("hsdp_container_host", stored.clone())
            .await
            .unwrap_err();
        assert!(err.is_consistency_error());
        let err = tester
            .delete("hsdp_container_host", stored)
            .await
            .unwrap_err();
        assert!(err.is_consistency_error());
    }

    #[tokio::test]
    async fn test_read_gone_host() {
        let cartel = MockCartel::new();
        let tester = tester(&cartel, &MockSsh::new()).await;
        let state = tester
            .read("hsdp_container_host", json!({"id": "i-1", "name": "host-1"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_import() {
        let cartel = MockCartel::new().with_instance(InstanceDetails {
            instance_id: "i-7".into(),
            name_tag: "legacy".into(),
            ..Default::default()
        });
        let tester = tester(&cartel, &MockSsh::new()).await;
        let imported = tester
            .import_resource("hsdp_container_host", "i-7")
            .await
            .unwrap();
        assert_eq!(imported[0].state["name"], "legacy");
    }

    #[tokio::test]
    async fn test_exec_uses_cartel_bastion() {
        let cartel = MockCartel::new().with_bastion("gw.example.com");
        let ssh = MockSsh::new();
        let tester = tester(&cartel, &ssh).await;

        let state = tester
            .lifecycle_create(
                "hsdp_container_host_exec",
                json!({"host": "10.0.0.9", "user": "core", "private_key": "key", "commands": ["uptime"]}),
            )
            .await
            .unwrap();
        assert!(!state["id"].as_str().unwrap().is_empty());
        assert_eq!(
            ssh.connections()[0].bastion.as_deref(),
            Some("gw.example.com")
        );
        assert_ok!(tester.delete("hsdp_container_host_exec", state).await);
    }

    #[tokio::test]
    async fn test_cartel_errors_surface() {
        let cartel = MockCartel::new().fail_method("create", CartelError::rejected(400, "bad"));
        let tester = tester(&cartel, &MockSsh::new()).await;
        let err = tester
            .create("hsdp_container_host", json!({"name": "host-1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Provisioning(_)));
        assert_eq!(cartel.count("destroy"), 1);
    }
}
