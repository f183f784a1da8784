//! In-memory store.
//!
//! Each mutation computes its full change set under the lock before applying
//! any of it, so a failed call leaves the state untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::closure::{paths_for_new_node, plan_move};
use super::{DeviceOwnership, OrgError, OrgStore, UserDirectory};
use crate::models::{
    Capability, OrgNode, OrgNodeFilter, OrgNodePath, OrgType, OrgTypePermission, Page,
    PageRequest, UpdateOrgNodeRequest, UserRef,
};

#[derive(Debug, Clone)]
struct StoredUser {
    user_id: Uuid,
    tenant_id: Uuid,
    org_node_id: Option<Uuid>,
    dealer_org_node_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct StoredDevice {
    tenant_id: Uuid,
    owner_org_node_id: Option<Uuid>,
    dealer_org_node_id: Option<Uuid>,
}

#[derive(Default)]
struct MemoryState {
    nodes: HashMap<Uuid, OrgNode>,
    paths: BTreeMap<(Uuid, Uuid, Uuid), OrgNodePath>,
    permissions: HashMap<(Uuid, OrgType), OrgTypePermission>,
    capabilities: Vec<Capability>,
    users: BTreeMap<Uuid, StoredUser>,
    devices: HashMap<Uuid, StoredDevice>,
}

impl MemoryState {
    fn node_in_tenant(&self, tenant_id: Uuid, org_node_id: Uuid) -> Option<&OrgNode> {
        self.nodes
            .get(&org_node_id)
            .filter(|n| n.tenant_id == tenant_id)
    }

    fn paths_where<F>(&self, tenant_id: Uuid, pred: F) -> Vec<OrgNodePath>
    where
        F: Fn(&OrgNodePath) -> bool,
    {
        self.paths
            .values()
            .filter(|p| p.tenant_id == tenant_id && pred(p))
            .copied()
            .collect()
    }

    fn user_ref(&self, user: &StoredUser) -> UserRef {
        UserRef {
            user_id: user.user_id,
            tenant_id: user.tenant_id,
            org_node_id: user.org_node_id,
            dealer_org_node_id: user.dealer_org_node_id,
            node_type_code: user
                .org_node_id
                .and_then(|id| self.nodes.get(&id))
                .map(|n| n.node_type_code.as_str().to_string()),
        }
    }

    fn insert_paths(&mut self, rows: impl IntoIterator<Item = OrgNodePath>) {
        for row in rows {
            self.paths.entry(row.key()).or_insert(row);
        }
    }
}

/// Mutex-guarded store backing tests and local tooling.
#[derive(Default)]
pub struct MemoryOrgStore {
    state: Mutex<MemoryState>,
}

impl MemoryOrgStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, OrgError> {
        self.state
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Memory org store"))
    }

    /// Register a user anchored at the given org and/or dealer.
    pub fn insert_user(
        &self,
        tenant_id: Uuid,
        org_node_id: Option<Uuid>,
        dealer_org_node_id: Option<Uuid>,
    ) -> Result<Uuid, OrgError> {
        let user_id = Uuid::new_v4();
        self.lock()?.users.insert(
            user_id,
            StoredUser {
                user_id,
                tenant_id,
                org_node_id,
                dealer_org_node_id,
            },
        );
        Ok(user_id)
    }

    /// Re-anchor an existing user, e.g. after they change org.
    pub fn set_user_org(&self, user_id: Uuid, org_node_id: Option<Uuid>) -> Result<(), OrgError> {
        let mut state = self.lock()?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| OrgError::NotFound(format!("User {} not found", user_id)))?;
        user.org_node_id = org_node_id;
        Ok(())
    }

    pub fn insert_device(
        &self,
        tenant_id: Uuid,
        owner_org_node_id: Option<Uuid>,
        dealer_org_node_id: Option<Uuid>,
    ) -> Result<Uuid, OrgError> {
        let device_id = Uuid::new_v4();
        self.lock()?.devices.insert(
            device_id,
            StoredDevice {
                tenant_id,
                owner_org_node_id,
                dealer_org_node_id,
            },
        );
        Ok(device_id)
    }

    pub fn remove_device(&self, device_id: Uuid) -> Result<(), OrgError> {
        self.lock()?.devices.remove(&device_id);
        Ok(())
    }

    pub fn insert_capability(&self, capability: Capability) -> Result<(), OrgError> {
        let mut state = self.lock()?;
        state
            .capabilities
            .retain(|c| c.cap_code != capability.cap_code);
        state.capabilities.push(capability);
        Ok(())
    }

    /// Drop a single closure row, bypassing every invariant. For repair tests.
    pub fn remove_path(
        &self,
        tenant_id: Uuid,
        ancestor_id: Uuid,
        descendant_id: Uuid,
    ) -> Result<(), OrgError> {
        self.lock()?
            .paths
            .remove(&(tenant_id, ancestor_id, descendant_id));
        Ok(())
    }

    /// Write a closure row as-is, bypassing every invariant. For repair tests.
    pub fn insert_raw_path(&self, path: OrgNodePath) -> Result<(), OrgError> {
        self.lock()?.paths.insert(path.key(), path);
        Ok(())
    }
}

#[async_trait]
impl OrgStore for MemoryOrgStore {
    async fn health_check(&self) -> Result<(), OrgError> {
        self.lock().map(|_| ())
    }

    async fn find_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Option<OrgNode>, OrgError> {
        Ok(self.lock()?.node_in_tenant(tenant_id, org_node_id).cloned())
    }

    async fn find_org_node_any_tenant(
        &self,
        org_node_id: Uuid,
    ) -> Result<Option<OrgNode>, OrgError> {
        Ok(self.lock()?.nodes.get(&org_node_id).cloned())
    }

    async fn find_org_nodes_by_tenant(
        &self,
        tenant_id: Uuid,
        node_type: Option<OrgType>,
    ) -> Result<Vec<OrgNode>, OrgError> {
        let state = self.lock()?;
        let mut nodes: Vec<OrgNode> = state
            .nodes
            .values()
            .filter(|n| n.tenant_id == tenant_id)
            .filter(|n| node_type.is_none_or(|t| n.node_type_code == t))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| {
            a.node_label
                .cmp(&b.node_label)
                .then(a.org_node_id.cmp(&b.org_node_id))
        });
        Ok(nodes)
    }

    async fn list_org_nodes(
        &self,
        tenant_id: Uuid,
        filter: &OrgNodeFilter,
        page: PageRequest,
    ) -> Result<Page<OrgNode>, OrgError> {
        let all = self.find_org_nodes_by_tenant(tenant_id, None).await?;
        let matching: Vec<OrgNode> = all.into_iter().filter(|n| filter.matches(n)).collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            page_size: page.limit(),
        })
    }

    async fn count_children(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<u64, OrgError> {
        let state = self.lock()?;
        let count = state
            .nodes
            .values()
            .filter(|n| n.tenant_id == tenant_id && n.parent_org_node_id == Some(org_node_id))
            .count();
        Ok(count as u64)
    }

    async fn insert_org_node(&self, node: &OrgNode) -> Result<(), OrgError> {
        let mut state = self.lock()?;

        let parent_paths = match node.parent_org_node_id {
            Some(parent_id) => {
                if state.node_in_tenant(node.tenant_id, parent_id).is_none() {
                    return Err(OrgError::NotFound(format!(
                        "Parent org node {} not found",
                        parent_id
                    )));
                }
                state.paths_where(node.tenant_id, |p| p.descendant_org_node_id == parent_id)
            }
            None => Vec::new(),
        };

        let rows = paths_for_new_node(
            node.tenant_id,
            node.org_node_id,
            node.parent_org_node_id,
            &parent_paths,
        )?;

        state.nodes.insert(node.org_node_id, node.clone());
        state.insert_paths(rows);
        Ok(())
    }

    async fn update_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        changes: &UpdateOrgNodeRequest,
    ) -> Result<Option<OrgNode>, OrgError> {
        let mut state = self.lock()?;
        let Some(node) = state
            .nodes
            .get_mut(&org_node_id)
            .filter(|n| n.tenant_id == tenant_id)
        else {
            return Ok(None);
        };
        node.apply(changes);
        Ok(Some(node.clone()))
    }

    async fn delete_org_node(&self, tenant_id: Uuid, org_node_id: Uuid) -> Result<(), OrgError> {
        let mut state = self.lock()?;
        if state.node_in_tenant(tenant_id, org_node_id).is_none() {
            return Err(OrgError::NotFound(format!(
                "Org node {} not found",
                org_node_id
            )));
        }

        let children = state
            .nodes
            .values()
            .filter(|n| n.tenant_id == tenant_id && n.parent_org_node_id == Some(org_node_id))
            .count() as u64;
        if children > 0 {
            return Err(OrgError::HasChildren(children));
        }

        state
            .paths
            .retain(|_, p| p.tenant_id != tenant_id || !p.touches(org_node_id));
        state.nodes.remove(&org_node_id);
        Ok(())
    }

    async fn move_org_node(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<(), OrgError> {
        let mut state = self.lock()?;
        if state.node_in_tenant(tenant_id, org_node_id).is_none() {
            return Err(OrgError::NotFound(format!(
                "Org node {} not found",
                org_node_id
            )));
        }
        if let Some(parent_id) = new_parent_id {
            if state.node_in_tenant(tenant_id, parent_id).is_none() {
                return Err(OrgError::NotFound(format!(
                    "Parent org node {} not found",
                    parent_id
                )));
            }
        }

        let subtree = state.paths_where(tenant_id, |p| p.ancestor_org_node_id == org_node_id);
        let parent_paths = match new_parent_id {
            Some(parent_id) => {
                state.paths_where(tenant_id, |p| p.descendant_org_node_id == parent_id)
            }
            None => Vec::new(),
        };
        let plan = plan_move(tenant_id, org_node_id, &subtree, new_parent_id, &parent_paths)?;

        state
            .paths
            .retain(|_, p| p.tenant_id != tenant_id || !plan.detaches(p));
        state.insert_paths(plan.insert);
        if let Some(node) = state.nodes.get_mut(&org_node_id) {
            node.parent_org_node_id = new_parent_id;
            node.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn find_descendant_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError> {
        Ok(self
            .lock()?
            .paths_where(tenant_id, |p| p.ancestor_org_node_id == org_node_id))
    }

    async fn find_ancestor_paths(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<Vec<OrgNodePath>, OrgError> {
        Ok(self
            .lock()?
            .paths_where(tenant_id, |p| p.descendant_org_node_id == org_node_id))
    }

    async fn path_exists(
        &self,
        tenant_id: Uuid,
        ancestor_id: Uuid,
        descendant_id: Uuid,
    ) -> Result<bool, OrgError> {
        Ok(self
            .lock()?
            .paths
            .contains_key(&(tenant_id, ancestor_id, descendant_id)))
    }

    async fn find_paths_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<OrgNodePath>, OrgError> {
        Ok(self.lock()?.paths_where(tenant_id, |_| true))
    }

    async fn replace_tenant_paths(
        &self,
        tenant_id: Uuid,
        paths: &[OrgNodePath],
    ) -> Result<(), OrgError> {
        if let Some(stray) = paths.iter().find(|p| p.tenant_id != tenant_id) {
            return Err(OrgError::Validation(format!(
                "Closure row {:?} does not belong to tenant {}",
                stray, tenant_id
            )));
        }
        let mut state = self.lock()?;
        state.paths.retain(|_, p| p.tenant_id != tenant_id);
        state.insert_paths(paths.iter().copied());
        Ok(())
    }

    async fn upsert_org_type_permission(
        &self,
        record: &OrgTypePermission,
    ) -> Result<OrgTypePermission, OrgError> {
        self.lock()?.permissions.insert(
            (record.tenant_id, record.node_type_code),
            record.clone(),
        );
        Ok(record.clone())
    }

    async fn find_org_type_permission(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Option<OrgTypePermission>, OrgError> {
        Ok(self
            .lock()?
            .permissions
            .get(&(tenant_id, node_type))
            .cloned())
    }

    async fn find_org_type_permissions_by_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<OrgTypePermission>, OrgError> {
        let mut records: Vec<OrgTypePermission> = self
            .lock()?
            .permissions
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.node_type_code);
        Ok(records)
    }

    async fn find_capabilities_by_codes(
        &self,
        codes: &[String],
    ) -> Result<Vec<Capability>, OrgError> {
        let mut caps: Vec<Capability> = self
            .lock()?
            .capabilities
            .iter()
            .filter(|c| codes.contains(&c.cap_code))
            .cloned()
            .collect();
        caps.sort_by(|a, b| a.cap_code.cmp(&b.cap_code));
        Ok(caps)
    }

    async fn get_all_capabilities(&self) -> Result<Vec<Capability>, OrgError> {
        let mut caps = self.lock()?.capabilities.clone();
        caps.sort_by(|a, b| {
            a.sort_order_val
                .cmp(&b.sort_order_val)
                .then_with(|| a.cap_code.cmp(&b.cap_code))
        });
        Ok(caps)
    }
}

#[async_trait]
impl UserDirectory for MemoryOrgStore {
    async fn find_users_in_orgs(
        &self,
        tenant_id: Uuid,
        org_node_ids: &[Uuid],
    ) -> Result<Vec<UserRef>, OrgError> {
        let state = self.lock()?;
        let in_scope = |id: Option<Uuid>| id.is_some_and(|id| org_node_ids.contains(&id));
        Ok(state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .filter(|u| in_scope(u.org_node_id) || in_scope(u.dealer_org_node_id))
            .map(|u| state.user_ref(u))
            .collect())
    }

    async fn find_users_by_org_type(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<Vec<UserRef>, OrgError> {
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .map(|u| state.user_ref(u))
            .filter(|u| u.org_type() == Some(node_type))
            .collect())
    }

    async fn find_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<UserRef>, OrgError> {
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .filter(|u| u.tenant_id == tenant_id)
            .map(|u| state.user_ref(u))
            .collect())
    }
}

#[async_trait]
impl DeviceOwnership for MemoryOrgStore {
    async fn count_owned_devices(
        &self,
        tenant_id: Uuid,
        org_node_id: Uuid,
    ) -> Result<u64, OrgError> {
        let count = self
            .lock()?
            .devices
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .filter(|d| {
                d.owner_org_node_id == Some(org_node_id)
                    || d.dealer_org_node_id == Some(org_node_id)
            })
            .count();
        Ok(count as u64)
    }
}
