//! Helper functions for common reconciliation patterns
//!
//! Every AWS resource the provisioner owns is reconciled the same way:
//! 1. Look it up by name
//! 2. If absent, create it (or report `NotConverged` in verify mode)
//! 3. If present, compare the immutable fields and fail with a conflict on drift
//!
//! These helpers keep that pattern, its retries and its log lines in one
//! place.

use crate::context::RunContext;
use crate::error::ProvisionerError;
use crate::report::ResourceStatus;
use std::fmt::Debug;
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Whether a reconciler may issue mutating calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Create or update whatever is missing
    Apply,
    /// Compare only; anything missing or drifted is `NotConverged`
    Verify,
}

impl ReconcileMode {
    /// Error for a change verify mode is not allowed to make
    pub fn forbid(self, change: impl Into<String>) -> Result<(), ProvisionerError> {
        match self {
            Self::Apply => Ok(()),
            Self::Verify => {
                let change = change.into();
                warn!("Verify mode: would {}", change);
                Err(ProvisionerError::NotConverged(format!("would {}", change)))
            }
        }
    }
}

/// Generic lookup-or-create pattern
///
/// `lookup` returns `Ok(None)` when the resource does not exist. Both calls
/// are retried on transient errors. A create that loses a race against
/// another writer (`AlreadyExists`) falls back to the lookup.
///
/// Returns the resource and whether it was created.
pub async fn lookup_or_create<T, L, LFut, C, CFut>(
    ctx: &RunContext,
    mode: ReconcileMode,
    kind: &str,
    name: &str,
    mut lookup: L,
    create: C,
) -> Result<(T, ResourceStatus), ProvisionerError>
where
    L: FnMut() -> LFut,
    LFut: Future<Output = Result<Option<T>, ProvisionerError>>,
    C: FnMut() -> CFut,
    CFut: Future<Output = Result<T, ProvisionerError>>,
{
    let describe_op = format!("describe {} {}", kind, name);
    if let Some(existing) = ctx.retry(&describe_op, &mut lookup).await? {
        debug!("{} {} already exists", kind, name);
        return Ok((existing, ResourceStatus::Unchanged));
    }

    mode.forbid(format!("create {} {}", kind, name))?;
    info!("Creating {} {}", kind, name);
    match ctx.retry(&format!("create {} {}", kind, name), create).await {
        Ok(created) => {
            info!("Created {} {}", kind, name);
            Ok((created, ResourceStatus::Created))
        }
        Err(e) if e.is_already_exists() => {
            warn!("{} {} was created concurrently, using the existing one", kind, name);
            let existing = ctx.retry(&describe_op, &mut lookup).await?.ok_or(e)?;
            Ok((existing, ResourceStatus::Unchanged))
        }
        Err(e) => {
            error!("Failed to create {} {}: {}", kind, name, e);
            Err(e)
        }
    }
}

/// Differences between a desired and an observed resource
#[derive(Debug, Default)]
pub struct Drift {
    differences: Vec<String>,
}

impl Drift {
    /// Record `field` when the values differ
    pub fn compare<T: PartialEq + Debug + ?Sized>(&mut self, field: &str, desired: &T, observed: &T) {
        if desired != observed {
            self.differences
                .push(format!("{}: desired {:?}, found {:?}", field, desired, observed));
        }
    }

    pub fn push(&mut self, difference: impl Into<String>) {
        self.differences.push(difference.into());
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn differences(&self) -> &[String] {
        &self.differences
    }

    /// `Conflict` listing every difference, or `Ok` when there is none
    pub fn into_conflict(self, kind: &str, name: &str) -> Result<(), ProvisionerError> {
        if self.differences.is_empty() {
            return Ok(());
        }
        for difference in &self.differences {
            warn!("{} {} drifted: {}", kind, name, difference);
        }
        Err(ProvisionerError::Conflict(format!(
            "{} {} exists but differs ({})",
            kind,
            name,
            self.differences.join("; ")
        )))
    }
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
