//! AWS control-plane client
//!
//! Typed access to the EKS, IAM, EC2 and STS operations the provisioner
//! needs. The concrete client drives the `aws` CLI with JSON output; the
//! `test-util` feature adds an in-memory mock.
//!
//! # Example
//!
//! ```no_run
//! use aws_client::{AwsClientTrait, AwsCliClient};
//!
//! # async fn example() -> Result<(), aws_client::AwsError> {
//! let client = AwsCliClient::new("us-east-1", None);
//! let identity = client.get_caller_identity().await?;
//! let cluster = client.describe_cluster("demo-cluster").await?;
//! println!("{} {:?}", identity.account, cluster.map(|c| c.status));
//! # Ok(())
//! # }
//! ```
//!
//! # Error classification
//!
//! - **Transient**: throttling, service unavailable, call timeout
//! - **Permission**: access denied, missing or expired credentials
//! - **NotFound**: describe/get calls map this to `Ok(None)`

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod aws_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use aws_trait::AwsClientTrait;
pub use client::AwsCliClient;
pub use error::AwsError;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{FaultKind, MockAwsClient};
