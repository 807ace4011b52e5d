//! Dynamic Kubernetes object client
//!
//! Reads and writes arbitrary Kubernetes objects as JSON, keyed by
//! apiVersion, kind, namespace and name. The provisioner's three-way apply
//! is built on the four operations of `KubeClientTrait`.
//!
//! # Example
//!
//! ```no_run
//! use kube_client::{KubeClient, KubeClientTrait, ObjectKey};
//!
//! # async fn example() -> Result<(), kube_client::KubeClientError> {
//! let client = KubeClient::try_default().await?;
//! let key = ObjectKey::new("apps/v1", "Deployment", Some("default"), "nginx-deployment");
//! if let Some(live) = client.get(&key).await? {
//!     println!("{}", live["status"]["availableReplicas"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod object;
#[path = "trait.rs"]
pub mod kube_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{FIELD_MANAGER, KubeClient};
pub use error::KubeClientError;
pub use kube_trait::KubeClientTrait;
pub use object::{ObjectKey, merge_patch};
#[cfg(feature = "test-util")]
pub use mock::MockKubeClient;
