//! Org node model - one node of a tenant's organization tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Unknown enum code read from storage or a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: String,
}

/// Kind of organization node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgType {
    Factory,
    PackFactory,
    Dealer,
    Store,
}

impl OrgType {
    pub const ALL: [OrgType; 4] = [
        OrgType::Factory,
        OrgType::PackFactory,
        OrgType::Dealer,
        OrgType::Store,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgType::Factory => "FACTORY",
            OrgType::PackFactory => "PACK_FACTORY",
            OrgType::Dealer => "DEALER",
            OrgType::Store => "STORE",
        }
    }
}

impl std::fmt::Display for OrgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrgType {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "FACTORY" => Ok(OrgType::Factory),
            "PACK_FACTORY" => Ok(OrgType::PackFactory),
            "DEALER" => Ok(OrgType::Dealer),
            "STORE" => Ok(OrgType::Store),
            _ => Err(UnknownCode {
                kind: "org type",
                code: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for OrgType {
    type Error = UnknownCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle state of an org node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgState {
    Active,
    Disabled,
}

impl OrgState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgState::Active => "ACTIVE",
            OrgState::Disabled => "DISABLED",
        }
    }
}

impl std::str::FromStr for OrgState {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(OrgState::Active),
            "DISABLED" => Ok(OrgState::Disabled),
            _ => Err(UnknownCode {
                kind: "org state",
                code: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for OrgState {
    type Error = UnknownCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Org node entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrgNode {
    pub org_node_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub node_type_code: OrgType,
    pub node_label: String,
    pub parent_org_node_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub node_state_code: OrgState,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub address_text: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl OrgNode {
    /// Create a new, active org node.
    pub fn new(tenant_id: Uuid, req: CreateOrgNodeRequest) -> Self {
        let now = Utc::now();
        Self {
            org_node_id: Uuid::new_v4(),
            tenant_id,
            node_type_code: req.node_type_code,
            node_label: req.node_label.trim().to_string(),
            parent_org_node_id: req.parent_org_node_id,
            node_state_code: OrgState::Active,
            contact_name: req.contact.contact_name,
            contact_phone: req.contact.contact_phone,
            contact_email: req.contact.contact_email,
            address_text: req.contact.address_text,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Apply a partial update. Only label, contact and state fields are mutable.
    pub fn apply(&mut self, changes: &UpdateOrgNodeRequest) {
        if let Some(label) = &changes.node_label {
            self.node_label = label.trim().to_string();
        }
        if let Some(v) = &changes.contact.contact_name {
            self.contact_name = Some(v.clone());
        }
        if let Some(v) = &changes.contact.contact_phone {
            self.contact_phone = Some(v.clone());
        }
        if let Some(v) = &changes.contact.contact_email {
            self.contact_email = Some(v.clone());
        }
        if let Some(v) = &changes.contact.address_text {
            self.address_text = Some(v.clone());
        }
        if let Some(state) = changes.node_state_code {
            self.node_state_code = state;
        }
        self.updated_utc = Utc::now();
    }
}

/// Contact fields shared by create and update requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ContactFields {
    #[validate(length(max = 64))]
    pub contact_name: Option<String>,
    #[validate(length(max = 32))]
    pub contact_phone: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
    #[validate(length(max = 256))]
    pub address_text: Option<String>,
}

/// Request to create an org node.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrgNodeRequest {
    #[validate(length(min = 1, max = 128))]
    pub node_label: String,
    pub node_type_code: OrgType,
    pub parent_org_node_id: Option<Uuid>,
    #[serde(default)]
    #[validate(nested)]
    pub contact: ContactFields,
}

/// Request to update an org node. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOrgNodeRequest {
    #[validate(length(min = 1, max = 128))]
    pub node_label: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub contact: ContactFields,
    pub node_state_code: Option<OrgState>,
}

impl UpdateOrgNodeRequest {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.node_label.is_none()
            && self.node_state_code.is_none()
            && self.contact.contact_name.is_none()
            && self.contact.contact_phone.is_none()
            && self.contact.contact_email.is_none()
            && self.contact.address_text.is_none()
    }
}

/// Filters for listing org nodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrgNodeFilter {
    pub node_type_code: Option<OrgType>,
    pub node_state_code: Option<OrgState>,
    pub parent_org_node_id: Option<Uuid>,
    pub label_contains: Option<String>,
    /// Restrict to these ids; set from a resolved scope.
    #[serde(skip)]
    pub within: Option<Vec<Uuid>>,
}

impl OrgNodeFilter {
    pub fn matches(&self, node: &OrgNode) -> bool {
        if self.node_type_code.is_some_and(|t| t != node.node_type_code) {
            return false;
        }
        if self.node_state_code.is_some_and(|s| s != node.node_state_code) {
            return false;
        }
        if let Some(parent) = self.parent_org_node_id {
            if node.parent_org_node_id != Some(parent) {
                return false;
            }
        }
        if let Some(needle) = &self.label_contains {
            if !node
                .node_label
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(ids) = &self.within {
            if !ids.contains(&node.org_node_id) {
                return false;
            }
        }
        true
    }
}

/// Page request (1-based).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit())
    }

    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Tree node with children for hierarchical response.
#[derive(Debug, Clone, Serialize)]
pub struct OrgTreeNode {
    #[serde(flatten)]
    pub node: OrgNode,
    pub children: Vec<OrgTreeNode>,
}

/// Rollup counts for a single org.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrgRollup {
    pub org_node_id: Uuid,
    pub direct_children: u64,
    pub subtree_size: u64,
    pub owned_devices: u64,
}
