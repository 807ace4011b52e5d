//! Helm release client
//!
//! Installs, inspects and rolls back chart releases through the `helm` CLI.
//!
//! # Example
//!
//! ```no_run
//! use helm_client::{HelmCli, HelmClientTrait};
//!
//! # async fn example() -> Result<(), helm_client::HelmError> {
//! let helm = HelmCli::new().with_context("/tmp/kubeconfig", "demo-cluster");
//! helm.add_repo("eks", "https://aws.github.io/eks-charts").await?;
//! let release = helm.get_release("aws-load-balancer-controller", "kube-system").await?;
//! println!("{:?}", release.map(|r| r.revision));
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod helm_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::HelmCli;
pub use error::HelmError;
pub use helm_trait::HelmClientTrait;
pub use models::{HelmRelease, ReleaseRequest, ReleaseRevision, ReleaseStatus};
#[cfg(feature = "test-util")]
pub use mock::MockHelmClient;
