//! Org node path entry (closure table row).

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One ancestor/descendant pair of the materialized closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, FromRow)]
pub struct OrgNodePath {
    pub tenant_id: Uuid,
    pub ancestor_org_node_id: Uuid,
    pub descendant_org_node_id: Uuid,
    pub depth_val: i32,
}

impl OrgNodePath {
    /// The self-row every live org owns.
    pub fn self_row(tenant_id: Uuid, org_node_id: Uuid) -> Self {
        Self {
            tenant_id,
            ancestor_org_node_id: org_node_id,
            descendant_org_node_id: org_node_id,
            depth_val: 0,
        }
    }

    pub fn is_self_row(&self) -> bool {
        self.ancestor_org_node_id == self.descendant_org_node_id && self.depth_val == 0
    }

    pub fn touches(&self, org_node_id: Uuid) -> bool {
        self.ancestor_org_node_id == org_node_id || self.descendant_org_node_id == org_node_id
    }

    /// Composite key (without depth).
    pub fn key(&self) -> (Uuid, Uuid, Uuid) {
        (
            self.tenant_id,
            self.ancestor_org_node_id,
            self.descendant_org_node_id,
        )
    }
}
