//! Diff engine for comparing desired vs observed users.
//!
//! This module computes the ordered list of operations that brings a pool
//! user in line with its desired record. It is pure: no I/O, no clock.

use serde::Serialize;
use tracing::debug;

use crate::backend::{DesiredUser, ObservedUser};

/// Engine for computing operations between desired and observed users.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Kind of reconcile operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create the user.
    Create,
    /// Replace the user's attributes.
    UpdateAttributes,
    /// Enable the user.
    Enable,
    /// Disable the user.
    Disable,
    /// Delete the user.
    Delete,
}

/// A single required operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Desired record the operation targets.
    pub user: DesiredUser,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Observed value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the operations needed to converge `observed` to `desired`.
    ///
    /// A user being deleted yields a single `Delete`. An absent user yields
    /// `Create`, followed by `Disable` when the desired record is disabled,
    /// since pools create accounts enabled. A present user yields
    /// `UpdateAttributes` and/or `Enable`/`Disable` for each differing facet.
    /// Matching records yield nothing.
    #[must_use]
    pub fn compute(
        &self,
        desired: &DesiredUser,
        observed: Option<&ObservedUser>,
        deleting: bool,
    ) -> Vec<ReconcileOperation> {
        if deleting {
            debug!("User {} is being deleted", desired.name);
            return vec![ReconcileOperation::new(OperationKind::Delete, desired)];
        }

        let Some(observed) = observed else {
            debug!("User {} needs to be created", desired.name);
            let mut ops = vec![ReconcileOperation::new(OperationKind::Create, desired)];
            if !desired.enabled {
                ops.push(ReconcileOperation::new(OperationKind::Disable, desired));
            }
            return ops;
        };

        let mut ops = Vec::new();

        if observed.email != desired.email {
            ops.push(
                ReconcileOperation::new(OperationKind::UpdateAttributes, desired).with_detail(
                    "email",
                    Some(observed.email.clone()),
                    Some(desired.email.clone()),
                ),
            );
        }

        if observed.enabled != desired.enabled {
            let kind = if desired.enabled {
                OperationKind::Enable
            } else {
                OperationKind::Disable
            };
            ops.push(ReconcileOperation::new(kind, desired).with_detail(
                "enabled",
                Some(observed.enabled.to_string()),
                Some(desired.enabled.to_string()),
            ));
        }

        if ops.is_empty() {
            debug!("User {} is up to date", desired.name);
        } else {
            debug!("User {} needs {} operations", desired.name, ops.len());
        }

        ops
    }
}

impl ReconcileOperation {
    /// Creates an operation without details.
    #[must_use]
    pub fn new(kind: OperationKind, user: &DesiredUser) -> Self {
        Self {
            kind,
            user: user.clone(),
            details: Vec::new(),
        }
    }

    /// Adds a field-level detail.
    #[must_use]
    pub fn with_detail(
        mut self,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.details.push(DiffDetail {
            field: field.to_string(),
            old_value,
            new_value,
        });
        self
    }

    /// Returns true if this is a create operation.
    #[must_use]
    pub const fn is_create(&self) -> bool {
        matches!(self.kind, OperationKind::Create)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::UpdateAttributes => "update-attributes",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ReconcileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.user.name)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(
                    f,
                    "{}: {} -> {}",
                    detail.field,
                    detail.old_value.as_deref().unwrap_or("-"),
                    detail.new_value.as_deref().unwrap_or("-")
                )?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
