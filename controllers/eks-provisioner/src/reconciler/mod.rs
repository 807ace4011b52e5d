//! Reconcilers for the two control planes the provisioner drives.
//!
//! - `aws`: EKS control plane, IAM roles, OIDC provider, node capacity
//! - `kubernetes`: three-way apply of Kubernetes objects with readiness waits

pub mod aws;
pub mod kubernetes;
