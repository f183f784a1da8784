//! Caller scope resolution.
//!
//! Every tenant-scoped query in the platform takes a [`Scope`]: either the
//! whole tenant or the self-inclusive subtree under the caller's anchor.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use super::{ClosureIndex, OrgError};
use crate::models::ScopeAnchor;

/// Result of resolving a caller's anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "org_node_ids", rename_all = "snake_case")]
pub enum Scope {
    /// Entire tenant.
    Unscoped,
    /// The anchor and everything below it.
    Subtree(HashSet<Uuid>),
}

impl Scope {
    pub fn is_unscoped(&self) -> bool {
        matches!(self, Scope::Unscoped)
    }

    /// Whether a record owned by `owner` is visible. Records without an owner
    /// are only visible unscoped.
    pub fn permits(&self, owner: Option<Uuid>) -> bool {
        match self {
            Scope::Unscoped => true,
            Scope::Subtree(ids) => owner.is_some_and(|id| ids.contains(&id)),
        }
    }

    pub fn contains(&self, org_node_id: Uuid) -> bool {
        self.permits(Some(org_node_id))
    }

    /// Keep only the ids inside the scope.
    pub fn restrict<I>(&self, ids: I) -> Vec<Uuid>
    where
        I: IntoIterator<Item = Uuid>,
    {
        ids.into_iter().filter(|id| self.contains(*id)).collect()
    }

    /// Ids for an `= ANY($n)` bind, sorted. `None` when unscoped.
    pub fn org_ids(&self) -> Option<Vec<Uuid>> {
        match self {
            Scope::Unscoped => None,
            Scope::Subtree(ids) => {
                let mut ids: Vec<Uuid> = ids.iter().copied().collect();
                ids.sort();
                Some(ids)
            }
        }
    }

    /// Intersect a caller-requested org filter with the scope.
    ///
    /// `None` means "no filter requested"; the result is then the scope itself.
    pub fn narrow(&self, requested: Option<&[Uuid]>) -> Scope {
        match (self, requested) {
            (_, None) => self.clone(),
            (Scope::Unscoped, Some(ids)) => Scope::Subtree(ids.iter().copied().collect()),
            (Scope::Subtree(own), Some(ids)) => Scope::Subtree(
                ids.iter().copied().filter(|id| own.contains(id)).collect(),
            ),
        }
    }
}

/// Turns anchors into scopes.
#[derive(Clone)]
pub struct ScopeResolver {
    closure: ClosureIndex,
}

impl ScopeResolver {
    pub fn new(closure: ClosureIndex) -> Self {
        Self { closure }
    }

    /// No anchor (or a nil one) means the whole tenant.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_scope(
        &self,
        tenant_id: Uuid,
        anchor: Option<ScopeAnchor>,
    ) -> Result<Scope, OrgError> {
        match anchor.filter(|a| !a.org_node_id().is_nil()) {
            None => Ok(Scope::Unscoped),
            Some(anchor) => {
                let ids = self
                    .closure
                    .descendants_of(tenant_id, anchor.org_node_id())
                    .await?;
                Ok(Scope::Subtree(ids))
            }
        }
    }

    /// Whether a caller anchored at `accessor` may act on `target`.
    ///
    /// Not an existence check: `accessor == target` is allowed without a
    /// lookup, so callers must still load the target within `tenant_id`.
    pub async fn can_access(
        &self,
        tenant_id: Uuid,
        accessor: Option<Uuid>,
        target_id: Uuid,
    ) -> Result<bool, OrgError> {
        let accessor = match accessor.filter(|id| !id.is_nil()) {
            None => return Ok(true),
            Some(id) => id,
        };
        if accessor == target_id {
            return Ok(true);
        }
        self.closure
            .is_descendant(tenant_id, accessor, target_id)
            .await
    }
}
