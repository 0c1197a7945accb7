//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a `ProviderService` without a plugin host.
//! [`MockCartel`] and [`MockSsh`] stand in for the Cartel API and for SSH
//! sessions; both record every call so tests can assert on what was sent.
//!
//! # Example
//!
//! ```ignore
//! use hsdp_provider::testing::{MockCartel, MockSsh, ProviderTester};
//! use hsdp_provider::HsdpProvider;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_create_host() {
//!     let cartel = MockCartel::new();
//!     let provider = HsdpProvider::new(Arc::new(cartel.clone()))
//!         .with_ssh(Arc::new(MockSsh::new()));
//!     let tester = ProviderTester::new(provider);
//!     tester.configure(json!({"cartel_host": "cartel", "cartel_token": "t", "cartel_secret": "s"})).await.unwrap();
//!
//!     let state = tester.lifecycle_create("hsdp_container_host", json!({"name": "host-1"})).await.unwrap();
//!     assert_eq!(cartel.count("create"), 1);
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cartel::{
    CartelApi, CartelConnector, CartelError, CreateRequest, CreatedInstance, DeploymentState,
    InstanceDetails,
};
use crate::config::CartelConfig;
use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::sets::BASE_SECURITY_GROUP;
use crate::ssh::{CommandOutput, RemoteSession, SshConnector, SshError, SshTarget};
use crate::types::{ApplyResult, ImportedResource, PlanResult};

/// A test harness for `ProviderService` implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run plan, create and read. Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        check_diagnostics(created.diagnostics)?;
        self.read_existing(resource_type, created.state).await
    }

    /// Run plan, update and read. Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, TestError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        check_diagnostics(updated.diagnostics)?;
        self.read_existing(resource_type, updated.state).await
    }

    /// Run a full CRUD lifecycle: create, update, delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.delete(resource_type, updated_state.clone()).await?;
        Ok(updated_state)
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, TestError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            TestError::Provider(ProviderError::NotFound(format!(
                "{} disappeared after apply",
                resource_type
            )))
        })
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    if has_errors(&diagnostics) {
        Err(TestError::Diagnostics(
            diagnostics.into_iter().filter(Diagnostic::is_error).collect(),
        ))
    } else {
        Ok(())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result creates the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan requires replacement or has no changes.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan leaves a specific attribute path alone.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        has_errors(diagnostics),
        "Expected at least one error, but got none"
    );
}

/// Assert that diagnostics contain an error whose summary or detail
/// contains `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = |d: &&Diagnostic| {
        d.is_error()
            && (d.summary.contains(substring)
                || d.detail.as_deref().is_some_and(|s| s.contains(substring)))
    };

    assert!(
        diagnostics.iter().any(|d| matches(&d)),
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain a warning with the given summary.
///
/// # Panics
///
/// Panics if no warning has that summary.
pub fn assert_has_warning(diagnostics: &[Diagnostic], summary: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Warning && d.summary == summary),
        "Expected a warning '{}', got: {:?}",
        summary,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =========================================================================
// Mock Cartel
// =========================================================================

#[derive(Default)]
struct CartelInner {
    bastion: String,
    instances: Vec<InstanceDetails>,
    states: VecDeque<DeploymentState>,
    failures: HashMap<String, CartelError>,
    calls: Vec<String>,
    created: u32,
}

/// In-memory Cartel API.
///
/// Hosts created through it appear in its inventory; deployment states are
/// taken from the script set with [`MockCartel::with_states`], falling back
/// to `succeeded` for known hosts and an HTTP 400 for unknown ones. Clones
/// share state, so a test can keep one handle and give another to the
/// provider.
#[derive(Clone, Default)]
pub struct MockCartel {
    inner: Arc<Mutex<CartelInner>>,
}

impl MockCartel {
    pub fn new() -> Self {
        let mock = Self::default();
        lock(&mock.inner).bastion = "gw.cartel.example.com".to_string();
        mock
    }

    /// Default bastion reported to the provider.
    pub fn with_bastion(self, host: &str) -> Self {
        lock(&self.inner).bastion = host.to_string();
        self
    }

    /// Add a host to the inventory.
    pub fn with_instance(self, details: InstanceDetails) -> Self {
        lock(&self.inner).instances.push(details);
        self
    }

    /// Deployment states returned by successive state lookups.
    pub fn with_states(self, states: &[&str]) -> Self {
        lock(&self.inner).states = states
            .iter()
            .map(|s| s.parse().unwrap_or_else(|e| match e {}))
            .collect();
        self
    }

    /// Make every call to `method` fail with `err`.
    pub fn fail_method(self, method: &str, err: CartelError) -> Self {
        lock(&self.inner).failures.insert(method.to_string(), err);
        self
    }

    /// Every call made so far, as `"<method> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.inner).calls.clone()
    }

    /// Number of calls made to `method`.
    pub fn count(&self, method: &str) -> usize {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    /// Current inventory entry for `name_tag`.
    pub fn instance(&self, name_tag: &str) -> Option<InstanceDetails> {
        lock(&self.inner)
            .instances
            .iter()
            .find(|i| i.name_tag == name_tag)
            .cloned()
    }

    fn record(&self, method: &str, args: &str) -> Result<MutexGuard<'_, CartelInner>, CartelError> {
        let mut inner = lock(&self.inner);
        inner.calls.push(if args.is_empty() {
            method.to_string()
        } else {
            format!("{} {}", method, args)
        });
        if let Some(err) = inner.failures.get(method).cloned() {
            return Err(err);
        }
        Ok(inner)
    }

    fn update_instances(
        &self,
        method: &str,
        name_tags: &[String],
        args: String,
        apply: impl Fn(&mut InstanceDetails),
    ) -> Result<(), CartelError> {
        let mut inner = self.record(method, &format!("{} {}", name_tags.join(","), args))?;
        for instance in inner.instances.iter_mut() {
            if name_tags.contains(&instance.name_tag) {
                apply(instance);
            }
        }
        Ok(())
    }
}

fn not_found(name_tag: &str) -> CartelError {
    CartelError::rejected(404, format!("instance {} not found", name_tag))
}

#[async_trait::async_trait]
impl CartelApi for MockCartel {
    fn bastion_host(&self) -> String {
        lock(&self.inner).bastion.clone()
    }

    async fn create(&self, request: &CreateRequest) -> Result<CreatedInstance, CartelError> {
        let mut inner = self.record("create", &request.name_tag)?;
        if inner.instances.iter().any(|i| i.name_tag == request.name_tag) {
            return Err(CartelError::rejected(
                409,
                format!("instance {} already exists", request.name_tag),
            ));
        }

        inner.created += 1;
        let n = inner.created;
        let mut security_groups = vec![BASE_SECURITY_GROUP.to_string()];
        security_groups.extend(request.security_groups.iter().cloned());
        let mut tags: BTreeMap<String, String> = request.tags.clone();
        tags.entry("billing".to_string())
            .or_insert_with(|| "cartel".to_string());

        let details = InstanceDetails {
            instance_id: format!("i-{:08x}", n),
            name_tag: request.name_tag.clone(),
            private_address: format!("10.0.0.{}", n + 3),
            public_address: if request.subnet_type == "public" {
                format!("52.0.0.{}", n)
            } else {
                String::new()
            },
            role: request.instance_role.clone(),
            instance_type: request.instance_type.clone(),
            vpc: "vpc-0001".to_string(),
            zone: "us-east-1a".to_string(),
            subnet: if request.subnet.is_empty() {
                format!("subnet-{}", request.subnet_type)
            } else {
                request.subnet.clone()
            },
            launch_time: "2026-01-01T00:00:00Z".to_string(),
            protection: request.protect,
            block_devices: (0..=request.number_of_volumes)
                .map(|i| format!("/dev/xvd{}", (b'a' + i as u8) as char))
                .collect(),
            security_groups,
            ldap_groups: request.user_groups.clone(),
            tags,
        };
        let created = CreatedInstance {
            instance_id: details.instance_id.clone(),
            ip_address: details.private_address.clone(),
        };
        inner.instances.push(details);
        Ok(created)
    }

    async fn destroy(&self, name_tag: &str) -> Result<(), CartelError> {
        let mut inner = self.record("destroy", name_tag)?;
        inner.instances.retain(|i| i.name_tag != name_tag);
        Ok(())
    }

    async fn get_details(&self, name_tag: &str) -> Result<InstanceDetails, CartelError> {
        let inner = self.record("get_details", name_tag)?;
        inner
            .instances
            .iter()
            .find(|i| i.name_tag == name_tag)
            .cloned()
            .ok_or_else(|| not_found(name_tag))
    }

    async fn get_all_instances(&self) -> Result<Vec<InstanceDetails>, CartelError> {
        let inner = self.record("get_all_instances", "")?;
        Ok(inner.instances.clone())
    }

    async fn get_deployment_state(&self, name_tag: &str) -> Result<DeploymentState, CartelError> {
        let mut inner = self.record("get_deployment_state", name_tag)?;
        if let Some(state) = inner.states.pop_front() {
            return Ok(state);
        }
        if inner.instances.iter().any(|i| i.name_tag == name_tag) {
            Ok(DeploymentState::Succeeded)
        } else {
            Err(CartelError::rejected(400, "state not found"))
        }
    }

    async fn add_tags(
        &self,
        name_tags: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), CartelError> {
        let args = tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        self.update_instances("add_tags", name_tags, args, |instance| {
            for (k, v) in tags {
                if v.is_empty() {
                    instance.tags.remove(k);
                } else {
                    instance.tags.insert(k.clone(), v.clone());
                }
            }
        })
    }

    async fn add_security_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError> {
        self.update_instances("add_security_groups", name_tags, groups.join(","), |i| {
            i.security_groups.extend(groups.iter().cloned())
        })
    }

    async fn remove_security_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError> {
        self.update_instances("remove_security_groups", name_tags, groups.join(","), |i| {
            i.security_groups.retain(|g| !groups.contains(g))
        })
    }

    async fn add_user_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError> {
        self.update_instances("add_user_groups", name_tags, groups.join(","), |i| {
            i.ldap_groups.extend(groups.iter().cloned())
        })
    }

    async fn remove_user_groups(
        &self,
        name_tags: &[String],
        groups: &[String],
    ) -> Result<(), CartelError> {
        self.update_instances("remove_user_groups", name_tags, groups.join(","), |i| {
            i.ldap_groups.retain(|g| !groups.contains(g))
        })
    }

    async fn set_protection(&self, name_tag: &str, protect: bool) -> Result<(), CartelError> {
        self.update_instances(
            "set_protection",
            &[name_tag.to_string()],
            protect.to_string(),
            |i| i.protection = protect,
        )
    }
}

impl CartelConnector for MockCartel {
    fn connect(&self, _config: &CartelConfig) -> Result<Arc<dyn CartelApi>, ProviderError> {
        Ok(Arc::new(self.clone()))
    }
}

// =========================================================================
// Mock SSH
// =========================================================================

#[derive(Default)]
struct SshInner {
    connect_error: Option<String>,
    failing_uploads: HashSet<String>,
    failing_commands: HashMap<String, u32>,
    timeouts: HashSet<String>,
    connections: Vec<SshTarget>,
    uploads: Vec<(String, Vec<u8>)>,
    commands: Vec<String>,
    closed: usize,
}

/// Recording SSH connector with scripted failures.
#[derive(Clone, Default)]
pub struct MockSsh {
    inner: Arc<Mutex<SshInner>>,
}

impl MockSsh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connection.
    pub fn fail_connect(self, message: &str) -> Self {
        lock(&self.inner).connect_error = Some(message.to_string());
        self
    }

    /// Fail uploads to `destination`.
    pub fn fail_upload(self, destination: &str) -> Self {
        lock(&self.inner)
            .failing_uploads
            .insert(destination.to_string());
        self
    }

    /// Make `command` exit with `status`.
    pub fn fail_command(self, command: &str, status: u32) -> Self {
        lock(&self.inner)
            .failing_commands
            .insert(command.to_string(), status);
        self
    }

    /// Make `command` run past its timeout.
    pub fn timeout_command(self, command: &str) -> Self {
        lock(&self.inner).timeouts.insert(command.to_string());
        self
    }

    /// Targets connected to, in order.
    pub fn connections(&self) -> Vec<SshTarget> {
        lock(&self.inner).connections.clone()
    }

    /// Successful uploads as `(destination, bytes)`.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        lock(&self.inner).uploads.clone()
    }

    /// Commands started, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner).commands.clone()
    }

    /// Number of sessions closed.
    pub fn closed(&self) -> usize {
        lock(&self.inner).closed
    }
}

#[async_trait::async_trait]
impl SshConnector for MockSsh {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError> {
        let mut inner = lock(&self.inner);
        inner.connections.push(target.clone());
        if let Some(message) = &inner.connect_error {
            return Err(SshError::Connect {
                host: target.host.clone(),
                message: message.clone(),
            });
        }
        Ok(Box::new(MockSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockSession {
    inner: Arc<Mutex<SshInner>>,
}

#[async_trait::async_trait]
impl RemoteSession for MockSession {
    async fn upload(
        &mut self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        destination: &str,
    ) -> Result<u64, SshError> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes).await?;

        let mut inner = lock(&self.inner);
        if inner.failing_uploads.contains(destination) {
            return Err(SshError::Upload {
                destination: destination.to_string(),
                message: "permission denied".to_string(),
            });
        }
        let written = bytes.len() as u64;
        inner.uploads.push((destination.to_string(), bytes));
        Ok(written)
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, SshError> {
        let mut inner = lock(&self.inner);
        inner.commands.push(command.to_string());
        if inner.timeouts.contains(command) {
            return Err(SshError::Timeout {
                command: command.to_string(),
                seconds: timeout.as_secs(),
            });
        }
        Ok(match inner.failing_commands.get(command) {
            Some(status) => CommandOutput {
                stdout: String::new(),
                stderr: format!("{}: failed", command),
                exit_status: Some(*status),
            },
            None => CommandOutput {
                stdout: "ok\n".to_string(),
                stderr: String::new(),
                exit_status: Some(0),
            },
        })
    }

    async fn close(&mut self) {
        lock(&self.inner).closed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_cartel_lifecycle() {
        let cartel = MockCartel::new();
        let created = cartel
            .create(&CreateRequest {
                name_tag: "host-1".into(),
                number_of_volumes: 2,
                security_groups: vec!["web".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let details = cartel.get_details("host-1").await.unwrap();
        assert_eq!(details.instance_id, created.instance_id);
        assert_eq!(details.block_devices.len(), 3);
        assert_eq!(details.security_groups, vec!["base", "web"]);
        assert_eq!(
            cartel.get_deployment_state("host-1").await.unwrap(),
            DeploymentState::Succeeded
        );

        cartel.destroy("host-1").await.unwrap();
        let err = cartel.get_deployment_state("host-1").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(cartel.count("get_deployment_state"), 2);
    }

    #[tokio::test]
    async fn test_mock_cartel_failures_are_recorded() {
        let cartel = MockCartel::new().fail_method("destroy", CartelError::rejected(500, "busy"));
        assert!(cartel.destroy("host-1").await.is_err());
        assert_eq!(cartel.calls(), vec!["destroy host-1"]);
    }

    #[tokio::test]
    async fn test_mock_cartel_tag_updates() {
        let cartel = MockCartel::new().with_instance(InstanceDetails {
            name_tag: "host-1".into(),
            tags: [("env".to_string(), "dev".to_string())].into_iter().collect(),
            ..Default::default()
        });
        let change: BTreeMap<String, String> = [
            ("env".to_string(), String::new()),
            ("team".to_string(), "core".to_string()),
        ]
        .into_iter()
        .collect();
        cartel
            .add_tags(&["host-1".to_string()], &change)
            .await
            .unwrap();

        let tags = cartel.instance("host-1").unwrap().tags;
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["team"], "core");
        assert_eq!(cartel.calls(), vec!["add_tags host-1 env=,team=core"]);
    }

    #[tokio::test]
    async fn test_mock_ssh_records() {
        let ssh = MockSsh::new().fail_command("false", 1);
        let target = SshTarget {
            host: "10.0.0.4".into(),
            port: 22,
            user: "core".into(),
            private_key: "key".into(),
            bastion: None,
        };
        let mut session = ssh.connect(&target).await.unwrap();
        let mut body: &[u8] = b"hi";
        assert_eq!(session.upload(&mut body, "/tmp/hi").await.unwrap(), 2);
        let ok = session.run("true", Duration::from_secs(1)).await.unwrap();
        assert!(ok.success());
        let failed = session.run("false", Duration::from_secs(1)).await.unwrap();
        assert_eq!(failed.exit_status, Some(1));
        session.close().await;

        assert_eq!(ssh.commands(), vec!["true", "false"]);
        assert_eq!(ssh.closed(), 1);
        assert_eq!(ssh.connections(), vec![target]);
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains_detail() {
        let diagnostics = vec![Diagnostic::error("conflict in file block")
            .with_detail("file /etc/x has neither 'source' or 'content', set one")];
        assert_error_contains(&diagnostics, "conflict");
        assert_error_contains(&diagnostics, "/etc/x");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
