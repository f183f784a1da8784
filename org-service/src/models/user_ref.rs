//! Weak references into the user and device domains.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::OrgType;

/// A user as seen by this service: tenant and org anchors only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UserRef {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub org_node_id: Option<Uuid>,
    pub dealer_org_node_id: Option<Uuid>,
    /// Type of the user's org, joined at read time.
    pub node_type_code: Option<String>,
}

impl UserRef {
    pub fn org_type(&self) -> Option<OrgType> {
        self.node_type_code.as_deref().and_then(|c| c.parse().ok())
    }

    /// Policy-engine subject for this user.
    pub fn subject(&self) -> String {
        user_subject(self.user_id)
    }
}

pub fn user_subject(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}
