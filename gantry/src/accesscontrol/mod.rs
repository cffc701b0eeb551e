//! The authorization seam and RBAC-driven cache invalidation.

mod invalidation;

pub use invalidation::Invalidator;

use gantry_core::{AccessSet, UserInfo};
use std::sync::Arc;

/// External collaborator evaluating authorization for callers.
///
/// Implementations typically sit on cached RBAC state. Sets are immutable
/// once produced; `purge_user_data` drops whatever the evaluator cached
/// for a subject name or access-set id, forcing the next resolution to
/// recompute.
pub trait AccessEvaluator: Send + Sync {
    /// The current access set for a user.
    fn access_for(&self, user: &UserInfo) -> Arc<AccessSet>;

    /// Drop cached authorization state for a subject or access-set id.
    fn purge_user_data(&self, id: &str);
}
