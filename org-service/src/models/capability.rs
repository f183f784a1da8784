//! Capability model - global menu/capability catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Capability entity (global, not tenant-scoped). Forms a tree through `parent_cap_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Capability {
    pub cap_id: Uuid,
    pub cap_code: String,
    pub parent_cap_id: Option<Uuid>,
    pub cap_label: String,
    pub sort_order_val: i32,
    pub created_utc: DateTime<Utc>,
}

impl Capability {
    /// Create a new capability.
    pub fn new(cap_code: &str, cap_label: &str, parent_cap_id: Option<Uuid>) -> Self {
        Self {
            cap_id: Uuid::new_v4(),
            cap_code: cap_code.to_string(),
            parent_cap_id,
            cap_label: cap_label.to_string(),
            sort_order_val: 0,
            created_utc: Utc::now(),
        }
    }

    pub fn with_sort_order(mut self, sort_order_val: i32) -> Self {
        self.sort_order_val = sort_order_val;
        self
    }

    /// Identifier of the permission fact written to the policy engine.
    pub fn permission_key(&self) -> String {
        format!("capability:{}", self.cap_id)
    }
}

/// Menu tree node handed to UI clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    pub code: String,
    pub label: String,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    pub fn leaf(code: &str, label: &str) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(code: &str, label: &str, children: Vec<MenuNode>) -> Self {
        Self {
            code: code.to_string(),
            label: label.to_string(),
            children,
        }
    }

    /// Codes of this node and every node below it, depth-first.
    pub fn codes(&self) -> Vec<String> {
        let mut out = vec![self.code.clone()];
        for child in &self.children {
            out.extend(child.codes());
        }
        out
    }
}
