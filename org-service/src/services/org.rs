//! Org CRUD, tree assembly and rollups.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use super::{ClosureIndex, DeviceOwnership, OrgError, OrgStore, ScopeResolver};
use crate::models::{
    CreateOrgNodeRequest, OrgNode, OrgNodeFilter, OrgRollup, OrgTreeNode, OrgType, Page,
    PageRequest, RequestContext, UpdateOrgNodeRequest,
};

#[derive(Clone)]
pub struct OrgService {
    store: Arc<dyn OrgStore>,
    devices: Arc<dyn DeviceOwnership>,
    closure: ClosureIndex,
    scope: ScopeResolver,
}

/// Load an org, telling an absent id apart from one owned by another tenant.
pub(crate) async fn require_org_in(
    store: &dyn OrgStore,
    tenant_id: Uuid,
    org_node_id: Uuid,
) -> Result<OrgNode, OrgError> {
    if let Some(node) = store.find_org_node(tenant_id, org_node_id).await? {
        return Ok(node);
    }
    match store.find_org_node_any_tenant(org_node_id).await? {
        Some(_) => Err(OrgError::CrossTenant),
        None => Err(OrgError::NotFound(format!(
            "Org node {} not found",
            org_node_id
        ))),
    }
}

pub(crate) fn require_tenant(tenant_id: Uuid) -> Result<(), OrgError> {
    if tenant_id.is_nil() {
        return Err(OrgError::Validation("tenant_id is required".to_string()));
    }
    Ok(())
}

impl OrgService {
    pub fn new(
        store: Arc<dyn OrgStore>,
        devices: Arc<dyn DeviceOwnership>,
        closure: ClosureIndex,
        scope: ScopeResolver,
    ) -> Self {
        Self {
            store,
            devices,
            closure,
            scope,
        }
    }

    async fn require_org(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<OrgNode, OrgError> {
        require_org_in(self.store.as_ref(), tenant_id, org_node_id).await
    }

    #[tracing::instrument(skip(self, req), fields(node_label = %req.node_label))]
    pub async fn create_org(
        &self,
        tenant_id: Uuid,
        req: CreateOrgNodeRequest,
    ) -> Result<Uuid, OrgError> {
        require_tenant(tenant_id)?;
        req.validate()?;

        if let Some(parent_id) = req.parent_org_node_id {
            self.require_org(tenant_id, parent_id).await?;
        }

        let node = OrgNode::new(tenant_id, req);
        self.store.insert_org_node(&node).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            org_node_id = %node.org_node_id,
            node_type = %node.node_type_code,
            parent_org_node_id = ?node.parent_org_node_id,
            "Org node created"
        );
        Ok(node.org_node_id)
    }

    #[tracing::instrument(skip(self, changes))]
    pub async fn update_org(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        changes: UpdateOrgNodeRequest,
    ) -> Result<OrgNode, OrgError> {
        require_tenant(tenant_id)?;
        changes.validate()?;
        if changes.is_empty() {
            self.require_org(tenant_id, org_node_id).await?;
            return Err(OrgError::Validation(
                "Update must change at least one field".to_string(),
            ));
        }

        match self
            .store
            .update_org_node(tenant_id, org_node_id, &changes)
            .await?
        {
            Some(node) => {
                tracing::info!(tenant_id = %tenant_id, org_node_id = %org_node_id, "Org node updated");
                Ok(node)
            }
            None => {
                // Distinguish cross-tenant from absent.
                self.require_org(tenant_id, org_node_id).await?;
                Err(OrgError::NotFound(format!(
                    "Org node {} not found",
                    org_node_id
                )))
            }
        }
    }

    /// Delete a leaf org that owns no devices.
    #[tracing::instrument(skip(self))]
    pub async fn delete_org(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<(), OrgError> {
        require_tenant(tenant_id)?;
        self.require_org(tenant_id, org_node_id).await?;

        let children = self.store.count_children(tenant_id, org_node_id).await?;
        if children > 0 {
            return Err(OrgError::HasChildren(children));
        }
        let devices = self
            .devices
            .count_owned_devices(tenant_id, org_node_id)
            .await?;
        if devices > 0 {
            return Err(OrgError::HasDevices(devices));
        }

        self.store.delete_org_node(tenant_id, org_node_id).await?;

        tracing::info!(tenant_id = %tenant_id, org_node_id = %org_node_id, "Org node deleted");
        Ok(())
    }

    pub async fn get_org(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<OrgNode, OrgError> {
        require_tenant(tenant_id)?;
        self.require_org(tenant_id, org_node_id).await
    }

    pub async fn list_orgs(
        &self,
        tenant_id: Uuid,
        filter: OrgNodeFilter,
        page: PageRequest,
    ) -> Result<Page<OrgNode>, OrgError> {
        require_tenant(tenant_id)?;
        self.store.list_org_nodes(tenant_id, &filter, page).await
    }

    /// `list_orgs` restricted to the caller's subtree.
    pub async fn list_orgs_for(
        &self,
        ctx: &RequestContext,
        mut filter: OrgNodeFilter,
        page: PageRequest,
    ) -> Result<Page<OrgNode>, OrgError> {
        let scope = self.scope.resolve_scope(ctx.tenant_id, ctx.anchor).await?;
        filter.within = scope.narrow(filter.within.as_deref()).org_ids();
        self.list_orgs(ctx.tenant_id, filter, page).await
    }

    /// The tenant's forest, optionally limited to one org type.
    #[tracing::instrument(skip(self))]
    pub async fn get_org_tree(
        &self,
        tenant_id: Uuid,
        node_type: Option<OrgType>,
    ) -> Result<Vec<OrgTreeNode>, OrgError> {
        require_tenant(tenant_id)?;
        let nodes = self
            .store
            .find_org_nodes_by_tenant(tenant_id, node_type)
            .await?;
        Ok(build_org_tree(nodes))
    }

    /// Reparent an org together with its subtree. `None` makes it a root.
    #[tracing::instrument(skip(self))]
    pub async fn move_org(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<(), OrgError> {
        require_tenant(tenant_id)?;
        let node = self.require_org(tenant_id, org_node_id).await?;
        if let Some(parent_id) = new_parent_id {
            if parent_id == org_node_id {
                return Err(OrgError::Validation(
                    "Cannot move an org node under itself".to_string(),
                ));
            }
            self.require_org(tenant_id, parent_id).await?;
        }
        if node.parent_org_node_id == new_parent_id {
            return Ok(());
        }

        self.store
            .move_org_node(tenant_id, org_node_id, new_parent_id)
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            org_node_id = %org_node_id,
            from_parent = ?node.parent_org_node_id,
            to_parent = ?new_parent_id,
            "Org node moved"
        );
        Ok(())
    }

    /// Child, subtree and device counts for an org the caller can see.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn org_rollup(
        &self,
        ctx: &RequestContext,
        org_node_id: Uuid,
    ) -> Result<OrgRollup, OrgError> {
        require_tenant(ctx.tenant_id)?;
        self.require_org(ctx.tenant_id, org_node_id).await?;

        if !self
            .scope
            .can_access(ctx.tenant_id, ctx.anchor_id(), org_node_id)
            .await?
        {
            return Err(OrgError::PermissionDenied(format!(
                "Org node {} is outside the caller's subtree",
                org_node_id
            )));
        }

        let direct_children = self.store.count_children(ctx.tenant_id, org_node_id).await?;
        let subtree_size = self
            .closure
            .descendants_of(ctx.tenant_id, org_node_id)
            .await?
            .len() as u64;
        let owned_devices = self
            .devices
            .count_owned_devices(ctx.tenant_id, org_node_id)
            .await?;

        Ok(OrgRollup {
            org_node_id,
            direct_children,
            subtree_size,
            owned_devices,
        })
    }
}

/// Assemble a forest from a flat list. A node whose parent is not in the list
/// becomes a root.
pub fn build_org_tree(nodes: Vec<OrgNode>) -> Vec<OrgTreeNode> {
    let present: HashSet<Uuid> = nodes.iter().map(|n| n.org_node_id).collect();
    let mut children_map: HashMap<Uuid, Vec<OrgNode>> = HashMap::new();
    let mut root_nodes: Vec<OrgNode> = Vec::new();

    for node in nodes {
        match node.parent_org_node_id {
            Some(parent_id) if present.contains(&parent_id) => {
                children_map.entry(parent_id).or_default().push(node);
            }
            _ => root_nodes.push(node),
        }
    }

    fn build_subtree(
        node: OrgNode,
        children_map: &mut HashMap<Uuid, Vec<OrgNode>>,
    ) -> OrgTreeNode {
        let children = children_map
            .remove(&node.org_node_id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| build_subtree(child, children_map))
            .collect();
        OrgTreeNode { node, children }
    }

    root_nodes
        .into_iter()
        .map(|node| build_subtree(node, &mut children_map))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContactFields;

    fn node(label: &str, node_type_code: OrgType, parent: Option<&OrgNode>) -> OrgNode {
        OrgNode::new(
            Uuid::nil(),
            CreateOrgNodeRequest {
                node_label: label.to_string(),
                node_type_code,
                parent_org_node_id: parent.map(|p| p.org_node_id),
                contact: ContactFields::default(),
            },
        )
    }

    #[test]
    fn test_build_tree_nests_children() {
        let a = node("A", OrgType::Factory, None);
        let b = node("B", OrgType::Dealer, Some(&a));
        let c = node("C", OrgType::Store, Some(&b));

        let tree = build_org_tree(vec![c.clone(), a.clone(), b.clone()]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].node.org_node_id, a.org_node_id);
        assert_eq!(tree[0].children[0].node.org_node_id, b.org_node_id);
        assert_eq!(
            tree[0].children[0].children[0].node.org_node_id,
            c.org_node_id
        );
    }

    #[test]
    fn test_filtered_out_parent_promotes_child_to_root() {
        let a = node("A", OrgType::Factory, None);
        let b = node("B", OrgType::Dealer, Some(&a));
        let b2 = node("B2", OrgType::Dealer, Some(&a));

        let tree = build_org_tree(vec![b.clone(), b2.clone()]);
        assert_eq!(tree.len(), 2);
        assert!(tree.iter().all(|t| t.children.is_empty()));
    }
}
