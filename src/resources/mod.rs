//! Resource implementations.

pub mod container_host;
pub mod container_host_exec;
