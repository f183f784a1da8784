//! Per (tenant, org type) capability grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::OrgType;

/// Persisted capability-code set and device-parameter permission string for one org type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrgTypePermission {
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub node_type_code: OrgType,
    pub ui_codes: Vec<String>,
    pub device_param_text: String,
    pub updated_utc: DateTime<Utc>,
}

impl OrgTypePermission {
    pub fn new(
        tenant_id: Uuid,
        node_type_code: OrgType,
        ui_codes: Vec<String>,
        device_param_text: String,
    ) -> Self {
        Self {
            tenant_id,
            node_type_code,
            ui_codes: normalize_codes(ui_codes),
            device_param_text: device_param_text.trim().to_string(),
            updated_utc: Utc::now(),
        }
    }

    /// Device parameter keys the org type may read or write.
    pub fn device_params(&self) -> Vec<String> {
        self.device_param_text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Trim, drop empties and de-duplicate, keeping first-seen order.
pub fn normalize_codes(codes: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    codes
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect()
}
