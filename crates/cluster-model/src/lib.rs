//! Desired-state model for EKS provisioning
//!
//! Typed replacement for the hand-edited `eksctl` flags and YAML manifests of
//! the manual cluster procedure. Every type here is declarative: AWS and the
//! Kubernetes API stay authoritative, the model only describes what should
//! exist.
//!
//! # Example
//!
//! ```no_run
//! use cluster_model::DesiredState;
//!
//! # fn example() -> Result<(), cluster_model::ModelError> {
//! let desired = DesiredState::load("demos/demo-cluster.yaml")?
//!     .with_cluster_identity(Some("demo-cluster"), Some("us-east-1"))?;
//! desired.validate()?;
//! let manifests = desired.core_manifests()?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod desired;
pub mod error;
pub mod iam;
pub mod manifest;
pub mod release;
pub mod workload;

pub use cluster::*;
pub use desired::DesiredState;
pub use error::ModelError;
pub use iam::*;
pub use manifest::*;
pub use release::*;
pub use workload::*;
