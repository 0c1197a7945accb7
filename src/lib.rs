//! HSDP container host provider
//!
//! Provisions container hosts through the Cartel API and bootstraps them
//! over SSH.
//!
//! # Overview
//!
//! - **Provisioning**: create a host, recover from ambiguous create failures
//!   by looking the host up by name, poll until it is ready and destroy it
//!   again if anything after the create call fails
//! - **Bootstrap**: copy files and run commands on the new host, optionally
//!   through a bastion
//! - **Drift detection**: refresh state from Cartel and refuse to act when
//!   the name tag now belongs to a different instance
//! - **Incremental updates**: tags, security groups and user groups are
//!   synced as additions and removals
//!
//! Resources are served through the [`ProviderService`] trait. The Cartel
//! client sits behind [`cartel::CartelApi`] and SSH behind
//! [`ssh::SshConnector`], so both can be swapped out in tests.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hsdp_provider::{HsdpProvider, ProviderService};
//!
//! let provider = HsdpProvider::new(Arc::new(my_cartel_connector));
//! provider
//!     .configure(serde_json::json!({
//!         "cartel_host": "cartel.example.com",
//!         "cartel_token": "token",
//!         "cartel_secret": "secret"
//!     }))
//!     .await?;
//!
//! let result = provider
//!     .create("hsdp_container_host", serde_json::json!({"name": "host-1"}))
//!     .await?;
//! ```
//!
//! # Resources
//!
//! - **hsdp_container_host**: a Cartel-managed container host
//! - **hsdp_container_host_exec**: files and commands run against an
//!   existing host

#![warn(clippy::all)]

pub mod bootstrap;
pub mod cartel;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod provision;
pub mod resources;
pub mod schema;
pub mod service;
pub mod sets;
pub mod ssh;
pub mod state;
pub mod testing;
pub mod types;
pub mod validation;
pub mod wait;

// Re-export main types at crate root
pub use cartel::{CartelApi, CartelConnector, CartelError, DeploymentState};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_debug_log, try_init_logging};
pub use provider::HsdpProvider;
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use sets::{normalize_tags, reconcile, SetChange};
pub use ssh::{RusshConnector, SshConnector};
pub use types::{ApplyResult, AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
