//! Authenticated request context, as resolved by the upstream context middleware.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller privilege tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeTier {
    /// Operator of the whole platform.
    Platform,
    /// Manufacturer / tenant administrator.
    TenantAdmin,
    /// Restricted to the subtree under its anchor.
    Scoped,
}

impl PrivilegeTier {
    pub fn is_privileged(&self) -> bool {
        matches!(self, PrivilegeTier::Platform | PrivilegeTier::TenantAdmin)
    }
}

/// The org a caller is restricted to.
///
/// Dealers are org nodes of type `DEALER`, so a dealer id and an org id
/// resolve through the same closure index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeAnchor(pub Uuid);

impl ScopeAnchor {
    /// Collapse the org and dealer anchors carried by a user record or token.
    /// The org anchor wins when both are set.
    pub fn from_ids(org_node_id: Option<Uuid>, dealer_org_node_id: Option<Uuid>) -> Option<Self> {
        org_node_id
            .or(dealer_org_node_id)
            .filter(|id| !id.is_nil())
            .map(ScopeAnchor)
    }

    pub fn org_node_id(&self) -> Uuid {
        self.0
    }
}

/// Per-request caller identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Uuid,
    pub caller_id: Uuid,
    pub anchor: Option<ScopeAnchor>,
    pub tier: PrivilegeTier,
}

impl RequestContext {
    /// Tenant-wide administrator (no anchor).
    pub fn tenant_admin(tenant_id: Uuid, caller_id: Uuid) -> Self {
        Self {
            tenant_id,
            caller_id,
            anchor: None,
            tier: PrivilegeTier::TenantAdmin,
        }
    }

    /// Caller restricted to the subtree under `anchor`.
    pub fn scoped(tenant_id: Uuid, caller_id: Uuid, anchor: Uuid) -> Self {
        Self {
            tenant_id,
            caller_id,
            anchor: Some(ScopeAnchor(anchor)),
            tier: PrivilegeTier::Scoped,
        }
    }

    pub fn anchor_id(&self) -> Option<Uuid> {
        self.anchor.map(|a| a.org_node_id())
    }
}
