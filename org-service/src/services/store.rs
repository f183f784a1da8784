//! Storage seams.
//!
//! `OrgStore` owns org rows, their closure rows and the permission tables.
//! `UserDirectory` and `DeviceOwnership` are read-only views into data other
//! domains own.

use async_trait::async_trait;
use uuid::Uuid;

use super::OrgError;
use crate::models::{
    Capability, OrgNode, OrgNodeFilter, OrgNodePath, OrgType, OrgTypePermission, Page,
    PageRequest, UpdateOrgNodeRequest, UserRef,
};

#[async_trait]
pub trait OrgStore: Send + Sync {
    async fn health_check(&self) -> Result<(), OrgError>;

    // ==================== Org Node Operations ====================

    /// Find an org node within a tenant.
    async fn find_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Option<OrgNode>, OrgError>;

    /// Find an org node regardless of tenant. Used to tell "absent" from "cross-tenant".
    async fn find_org_node_any_tenant(&self, org_node_id: Uuid)
        -> Result<Option<OrgNode>, OrgError>;

    /// All org nodes of a tenant, optionally of one type, ordered by label.
    async fn find_org_nodes_by_tenant(
        &self,
        tenant_id: Uuid,
        node_type: Option<OrgType>,
    ) -> Result<Vec<OrgNode>, OrgError>;

    async fn list_org_nodes(
        &self,
        tenant_id: Uuid,
        filter: &OrgNodeFilter,
        page: PageRequest,
    ) -> Result<Page<OrgNode>, OrgError>;

    async fn count_children(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<u64, OrgError>;

    /// Insert an org node together with its closure rows, atomically.
    ///
    /// Fails with `NotFound` if the parent vanished, leaving nothing behind.
    async fn insert_org_node(&self, node: &OrgNode) -> Result<(), OrgError>;

    /// Update label, contact and state fields. `None` if the node does not exist.
    async fn update_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        changes: &UpdateOrgNodeRequest,
    ) -> Result<Option<OrgNode>, OrgError>;

    /// Delete an org node and every closure row touching it, atomically.
    ///
    /// Fails with `HasChildren` if a child exists at delete time.
    async fn delete_org_node(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<(), OrgError>;

    /// Reparent an org node and its subtree, rewriting closure rows atomically.
    async fn move_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<(), OrgError>;

    // ==================== Closure Operations ====================

    /// Rows where `ancestor = org_node_id` (the subtree, self included).
    async fn find_descendant_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError>;

    /// Rows where `descendant = org_node_id` (the ancestor chain, self included).
    async fn find_ancestor_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError>;

    async fn path_exists(
        &self,
        tenant_id: Uuid,
        ancestor_id: Uuid,
        descendant_id: Uuid,
    ) -> Result<bool, OrgError>;

    async fn find_paths_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<OrgNodePath>, OrgError>;

    /// Replace every closure row of a tenant, atomically.
    async fn replace_tenant_paths(
        &self,
        tenant_id: Uuid,
        paths: &[OrgNodePath],
    ) -> Result<(), OrgError>;

    // ==================== Permission Operations ====================

    async fn upsert_org_type_permission(
        &self,
        record: &OrgTypePermission,
    ) -> Result<OrgTypePermission, OrgError>;

    async fn find_org_type_permission(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Option<OrgTypePermission>, OrgError>;

    async fn find_org_type_permissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<OrgTypePermission>, OrgError>;

    // ==================== Capability Catalog ====================

    async fn find_capabilities_by_codes(
        &self,
        codes: &[String],
    ) -> Result<Vec<Capability>, OrgError>;

    async fn get_all_capabilities(&self) -> Result<Vec<Capability>, OrgError>;
}

/// Read-only lookup of users anchored in the org tree.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users whose org or dealer anchor lies in `org_node_ids`, ordered by user id.
    async fn find_users_in_orgs(
        &self,
        tenant_id: Uuid,
        org_node_ids: &[Uuid],
    ) -> Result<Vec<UserRef>, OrgError>;

    /// Users whose org currently has the given type.
    async fn find_users_by_org_type(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Vec<UserRef>, OrgError>;

    async fn find_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<UserRef>, OrgError>;
}

/// Read-only lookup of devices owned by org nodes.
#[async_trait]
pub trait DeviceOwnership: Send + Sync {
    /// Devices whose owner or dealer is the given org.
    async fn count_owned_devices(&self, tenant_id: Uuid, org_node_id: Uuid)
        -> Result<u64, OrgError>;
}
