//! Closure index over the org tree.
//!
//! Every org owns a self-row `(org, org, 0)` and one row per ancestor, so
//! subtree containment is a single indexed lookup instead of a parent walk.
//! The row-planning functions here are pure; stores call them inside their
//! own transaction and persist the result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::{OrgError, OrgStore};
use crate::models::{OrgNode, OrgNodePath};

/// Rows to insert for a freshly created node: its self-row plus one row per
/// ancestor of the parent at `depth + 1`.
pub fn paths_for_new_node(
    tenant_id: Uuid,
    org_node_id: Uuid,
    parent_id: Option<Uuid>,
    parent_paths: &[OrgNodePath],
) -> Result<Vec<OrgNodePath>, OrgError> {
    let mut rows = vec![OrgNodePath::self_row(tenant_id, org_node_id)];

    let Some(parent_id) = parent_id else {
        return Ok(rows);
    };

    if !parent_paths
        .iter()
        .any(|p| p.is_self_row() && p.descendant_org_node_id == parent_id)
    {
        return Err(OrgError::Internal(anyhow::anyhow!(
            "closure index has no self-row for parent org node {}",
            parent_id
        )));
    }

    for path in parent_paths {
        if path.tenant_id != tenant_id || path.descendant_org_node_id != parent_id {
            return Err(OrgError::Internal(anyhow::anyhow!(
                "unexpected closure row {:?} while linking under {}",
                path,
                parent_id
            )));
        }
        rows.push(OrgNodePath {
            tenant_id,
            ancestor_org_node_id: path.ancestor_org_node_id,
            descendant_org_node_id: org_node_id,
            depth_val: path.depth_val + 1,
        });
    }

    Ok(rows)
}

/// Closure rewrite for reparenting a subtree.
#[derive(Debug, Clone)]
pub struct MovePlan {
    /// The moved node and all of its descendants.
    pub subtree_ids: Vec<Uuid>,
    /// New (ancestor above the subtree, node inside the subtree) rows.
    pub insert: Vec<OrgNodePath>,
}

impl MovePlan {
    /// Rows linking an ancestor outside the subtree to a node inside it.
    /// These are exactly the rows a move must delete.
    pub fn detaches(&self, path: &OrgNodePath) -> bool {
        self.subtree_ids.contains(&path.descendant_org_node_id)
            && !self.subtree_ids.contains(&path.ancestor_org_node_id)
    }
}

/// Plan a move of `org_node_id` under `new_parent_id`.
///
/// `subtree` are the rows with `ancestor = org_node_id`; `new_parent_paths`
/// are the rows with `descendant = new_parent_id`.
pub fn plan_move(
    tenant_id: Uuid,
    org_node_id: Uuid,
    subtree: &[OrgNodePath],
    new_parent_id: Option<Uuid>,
    new_parent_paths: &[OrgNodePath],
) -> Result<MovePlan, OrgError> {
    if !subtree
        .iter()
        .any(|p| p.is_self_row() && p.ancestor_org_node_id == org_node_id)
    {
        return Err(OrgError::Internal(anyhow::anyhow!(
            "closure index has no self-row for org node {}",
            org_node_id
        )));
    }

    let subtree_ids: Vec<Uuid> = subtree.iter().map(|p| p.descendant_org_node_id).collect();

    let Some(new_parent_id) = new_parent_id else {
        return Ok(MovePlan {
            subtree_ids,
            insert: Vec::new(),
        });
    };

    if subtree_ids.contains(&new_parent_id) {
        return Err(OrgError::Validation(
            "Cannot move an org node under itself or one of its descendants".to_string(),
        ));
    }

    if !new_parent_paths
        .iter()
        .any(|p| p.is_self_row() && p.descendant_org_node_id == new_parent_id)
    {
        return Err(OrgError::Internal(anyhow::anyhow!(
            "closure index has no self-row for parent org node {}",
            new_parent_id
        )));
    }

    let mut insert = Vec::with_capacity(new_parent_paths.len() * subtree.len());
    for above in new_parent_paths {
        for below in subtree {
            insert.push(OrgNodePath {
                tenant_id,
                ancestor_org_node_id: above.ancestor_org_node_id,
                descendant_org_node_id: below.descendant_org_node_id,
                depth_val: above.depth_val + below.depth_val + 1,
            });
        }
    }

    Ok(MovePlan {
        subtree_ids,
        insert,
    })
}

/// Every path derivable from the parent pointers of `nodes` (one tenant).
pub fn expected_paths(nodes: &[OrgNode]) -> Result<Vec<OrgNodePath>, OrgError> {
    let parents: HashMap<Uuid, Option<Uuid>> = nodes
        .iter()
        .map(|n| (n.org_node_id, n.parent_org_node_id))
        .collect();

    let mut rows = Vec::new();
    for node in nodes {
        let mut current = Some(node.org_node_id);
        let mut depth = 0;
        while let Some(ancestor) = current {
            if depth as usize > nodes.len() {
                return Err(OrgError::Internal(anyhow::anyhow!(
                    "parent pointers form a cycle through org node {}",
                    node.org_node_id
                )));
            }
            rows.push(OrgNodePath {
                tenant_id: node.tenant_id,
                ancestor_org_node_id: ancestor,
                descendant_org_node_id: node.org_node_id,
                depth_val: depth,
            });
            current = match parents.get(&ancestor) {
                Some(parent) => *parent,
                None => {
                    return Err(OrgError::Internal(anyhow::anyhow!(
                        "org node {} references missing parent {}",
                        node.org_node_id,
                        ancestor
                    )));
                }
            };
            depth += 1;
        }
    }
    Ok(rows)
}

/// Difference between the stored closure and the one implied by parent pointers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClosureReport {
    pub missing: Vec<OrgNodePath>,
    pub extra: Vec<OrgNodePath>,
}

impl ClosureReport {
    pub fn diff(expected: &[OrgNodePath], actual: &[OrgNodePath]) -> Self {
        let expected_set: HashSet<&OrgNodePath> = expected.iter().collect();
        let actual_set: HashSet<&OrgNodePath> = actual.iter().collect();

        let mut missing: Vec<OrgNodePath> = expected
            .iter()
            .filter(|p| !actual_set.contains(p))
            .copied()
            .collect();
        let mut extra: Vec<OrgNodePath> = actual
            .iter()
            .filter(|p| !expected_set.contains(p))
            .copied()
            .collect();
        missing.sort();
        extra.sort();

        Self { missing, extra }
    }

    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Query side of the closure table.
#[derive(Clone)]
pub struct ClosureIndex {
    store: Arc<dyn OrgStore>,
}

impl ClosureIndex {
    pub fn new(store: Arc<dyn OrgStore>) -> Self {
        Self { store }
    }

    /// The org and everything below it.
    ///
    /// The org itself is always included. A missing self-row is a data
    /// anomaly; it is logged and never read as "no restriction".
    #[tracing::instrument(skip(self))]
    pub async fn descendants_of(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<HashSet<Uuid>, OrgError> {
        let mut ids: HashSet<Uuid> = self
            .store
            .find_descendant_paths(tenant_id, org_node_id)
            .await?
            .into_iter()
            .map(|p| p.descendant_org_node_id)
            .collect();

        if ids.insert(org_node_id) {
            tracing::warn!(
                tenant_id = %tenant_id,
                org_node_id = %org_node_id,
                descendants = ids.len() - 1,
                "Closure index is missing the self-row; including the org itself"
            );
        }
        Ok(ids)
    }

    /// The org and every org above it. The org itself is always included.
    #[tracing::instrument(skip(self))]
    pub async fn ancestors_of(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<HashSet<Uuid>, OrgError> {
        let mut ids: HashSet<Uuid> = self
            .store
            .find_ancestor_paths(tenant_id, org_node_id)
            .await?
            .into_iter()
            .map(|p| p.ancestor_org_node_id)
            .collect();

        if ids.insert(org_node_id) {
            tracing::warn!(
                tenant_id = %tenant_id,
                org_node_id = %org_node_id,
                ancestors = ids.len() - 1,
                "Closure index is missing the self-row; including the org itself"
            );
        }
        Ok(ids)
    }

    /// Whether `candidate` lies in the subtree rooted at `ancestor` (inclusive).
    pub async fn is_descendant(
        &self,
        tenant_id: Uuid,
        ancestor_id: Uuid,
        candidate_id: Uuid,
    ) -> Result<bool, OrgError> {
        self.store
            .path_exists(tenant_id, ancestor_id, candidate_id)
            .await
    }

    /// Compare stored rows against the parent-pointer forest.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self, tenant_id: Uuid) -> Result<ClosureReport, OrgError> {
        let nodes = self.store.find_org_nodes_by_tenant(tenant_id, None).await?;
        let expected = expected_paths(&nodes)?;
        let actual = self.store.find_paths_by_tenant(tenant_id).await?;
        let report = ClosureReport::diff(&expected, &actual);

        if !report.is_consistent() {
            tracing::warn!(
                tenant_id = %tenant_id,
                missing = report.missing.len(),
                extra = report.extra.len(),
                "Closure index drifted from parent pointers"
            );
        }
        Ok(report)
    }

    /// Recompute the tenant's closure from parent pointers and replace it.
    /// Returns the drift that was repaired.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self, tenant_id: Uuid) -> Result<ClosureReport, OrgError> {
        let nodes = self.store.find_org_nodes_by_tenant(tenant_id, None).await?;
        let expected = expected_paths(&nodes)?;
        let actual = self.store.find_paths_by_tenant(tenant_id).await?;
        let report = ClosureReport::diff(&expected, &actual);

        if !report.is_consistent() {
            self.store.replace_tenant_paths(tenant_id, &expected).await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            rows = expected.len(),
            repaired_missing = report.missing.len(),
            repaired_extra = report.extra.len(),
            "Closure index rebuilt"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactFields, CreateOrgNodeRequest, OrgType};

    fn node(tenant_id: Uuid, parent: Option<Uuid>) -> OrgNode {
        OrgNode::new(
            tenant_id,
            CreateOrgNodeRequest {
                node_label: "n".to_string(),
                node_type_code: OrgType::Store,
                parent_org_node_id: parent,
                contact: ContactFields::default(),
            },
        )
    }

    fn chain(tenant_id: Uuid) -> (OrgNode, OrgNode, OrgNode) {
        let a = node(tenant_id, None);
        let b = node(tenant_id, Some(a.org_node_id));
        let c = node(tenant_id, Some(b.org_node_id));
        (a, b, c)
    }

    #[test]
    fn test_root_gets_only_self_row() {
        let tenant = Uuid::new_v4();
        let id = Uuid::new_v4();
        let rows = paths_for_new_node(tenant, id, None, &[]).unwrap();
        assert_eq!(rows, vec![OrgNodePath::self_row(tenant, id)]);
    }

    #[test]
    fn test_child_copies_parent_ancestors_one_deeper() {
        let tenant = Uuid::new_v4();
        let (a, b, c) = chain(tenant);
        let all = expected_paths(&[a.clone(), b.clone()]).unwrap();
        let parent_paths: Vec<OrgNodePath> = all
            .into_iter()
            .filter(|p| p.descendant_org_node_id == b.org_node_id)
            .collect();

        let rows =
            paths_for_new_node(tenant, c.org_node_id, Some(b.org_node_id), &parent_paths).unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.contains(&OrgNodePath::self_row(tenant, c.org_node_id)));
        assert!(rows.contains(&OrgNodePath {
            tenant_id: tenant,
            ancestor_org_node_id: b.org_node_id,
            descendant_org_node_id: c.org_node_id,
            depth_val: 1,
        }));
        assert!(rows.contains(&OrgNodePath {
            tenant_id: tenant,
            ancestor_org_node_id: a.org_node_id,
            descendant_org_node_id: c.org_node_id,
            depth_val: 2,
        }));
    }

    #[test]
    fn test_parent_without_self_row_is_rejected() {
        let tenant = Uuid::new_v4();
        let result = paths_for_new_node(tenant, Uuid::new_v4(), Some(Uuid::new_v4()), &[]);
        assert!(matches!(result, Err(OrgError::Internal(_))));
    }

    #[test]
    fn test_expected_paths_for_chain() {
        let tenant = Uuid::new_v4();
        let (a, b, c) = chain(tenant);
        let rows = expected_paths(&[a, b, c]).unwrap();
        // 3 self rows + (a,b) + (b,c) + (a,c)
        assert_eq!(rows.len(), 6);
        assert_eq!(rows.iter().filter(|p| p.is_self_row()).count(), 3);
    }

    #[test]
    fn test_expected_paths_detects_dangling_parent() {
        let tenant = Uuid::new_v4();
        let orphan = node(tenant, Some(Uuid::new_v4()));
        assert!(expected_paths(&[orphan]).is_err());
    }

    #[test]
    fn test_plan_move_rejects_own_descendant() {
        let tenant = Uuid::new_v4();
        let (a, b, c) = chain(tenant);
        let all = expected_paths(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let subtree: Vec<OrgNodePath> = all
            .iter()
            .filter(|p| p.ancestor_org_node_id == b.org_node_id)
            .copied()
            .collect();
        let c_paths: Vec<OrgNodePath> = all
            .iter()
            .filter(|p| p.descendant_org_node_id == c.org_node_id)
            .copied()
            .collect();

        let result = plan_move(tenant, b.org_node_id, &subtree, Some(c.org_node_id), &c_paths);
        assert!(matches!(result, Err(OrgError::Validation(_))));

        let result = plan_move(tenant, b.org_node_id, &subtree, Some(b.org_node_id), &subtree);
        assert!(matches!(result, Err(OrgError::Validation(_))));
    }

    #[test]
    fn test_plan_move_matches_recomputed_closure() {
        // a -> b -> c, and a separate root d. Move b under d.
        let tenant = Uuid::new_v4();
        let (a, mut b, c) = chain(tenant);
        let d = node(tenant, None);
        let before = expected_paths(&[a.clone(), b.clone(), c.clone(), d.clone()]).unwrap();

        let subtree: Vec<OrgNodePath> = before
            .iter()
            .filter(|p| p.ancestor_org_node_id == b.org_node_id)
            .copied()
            .collect();
        let d_paths: Vec<OrgNodePath> = before
            .iter()
            .filter(|p| p.descendant_org_node_id == d.org_node_id)
            .copied()
            .collect();

        let plan = plan_move(tenant, b.org_node_id, &subtree, Some(d.org_node_id), &d_paths).unwrap();
        let mut after: Vec<OrgNodePath> = before
            .iter()
            .filter(|p| !plan.detaches(p))
            .copied()
            .collect();
        after.extend(plan.insert.iter().copied());

        b.parent_org_node_id = Some(d.org_node_id);
        let expected = expected_paths(&[a, b, c, d]).unwrap();
        assert!(ClosureReport::diff(&expected, &after).is_consistent());
    }

    #[test]
    fn test_diff_reports_missing_and_extra() {
        let tenant = Uuid::new_v4();
        let (a, b, _) = chain(tenant);
        let expected = expected_paths(&[a.clone(), b.clone()]).unwrap();
        let stray = OrgNodePath {
            tenant_id: tenant,
            ancestor_org_node_id: b.org_node_id,
            descendant_org_node_id: a.org_node_id,
            depth_val: 1,
        };
        let mut actual: Vec<OrgNodePath> = expected
            .iter()
            .filter(|p| !p.is_self_row() || p.ancestor_org_node_id != a.org_node_id)
            .copied()
            .collect();
        actual.push(stray);

        let report = ClosureReport::diff(&expected, &actual);
        assert_eq!(report.missing, vec![OrgNodePath::self_row(tenant, a.org_node_id)]);
        assert_eq!(report.extra, vec![stray]);
        assert!(!report.is_consistent());
    }
}
