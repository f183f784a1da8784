//! Test helpers for org-service integration tests.
//!
//! Wires `OrgCore` over the in-memory store and mock policy engine.

#![allow(dead_code)]

use std::sync::Arc;

use org_service::{
    models::{
        Capability, ContactFields, CreateOrgNodeRequest, DealerTemplate, OrgType, RequestContext,
    },
    services::{MemoryOrgStore, MockPolicyEngine, OrgCore},
};
use uuid::Uuid;

pub struct Harness {
    pub tenant_id: Uuid,
    pub store: Arc<MemoryOrgStore>,
    pub engine: Arc<MockPolicyEngine>,
    pub core: OrgCore,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryOrgStore::new());
        let engine = Arc::new(MockPolicyEngine::new());
        let core = OrgCore::new(store.clone(), engine.clone());
        Self {
            tenant_id: Uuid::new_v4(),
            store,
            engine,
            core,
        }
    }

    pub fn admin(&self) -> RequestContext {
        RequestContext::tenant_admin(self.tenant_id, Uuid::new_v4())
    }

    pub fn scoped(&self, anchor: Uuid) -> RequestContext {
        RequestContext::scoped(self.tenant_id, Uuid::new_v4(), anchor)
    }

    pub async fn org(&self, label: &str, node_type: OrgType, parent: Option<Uuid>) -> Uuid {
        self.core
            .orgs
            .create_org(self.tenant_id, request(label, node_type, parent))
            .await
            .expect("Failed to create org")
    }

    pub fn user_at(&self, org_node_id: Uuid) -> Uuid {
        self.store
            .insert_user(self.tenant_id, Some(org_node_id), None)
            .expect("Failed to insert user")
    }

    /// Catalog containing every template code, nested under a few menu groups.
    pub fn seed_catalog(&self) {
        let dashboard = Capability::new("dashboard", "Dashboard", None).with_sort_order(1);
        let battery_list =
            Capability::new("battery_list", "Batteries", Some(dashboard.cap_id)).with_sort_order(1);
        let battery_detail = Capability::new("battery_detail", "Battery Detail", Some(battery_list.cap_id));
        let battery_control = Capability::new("battery_control", "Battery Control", Some(battery_list.cap_id))
            .with_sort_order(1);
        let users = Capability::new("user_list", "Users", None).with_sort_order(2);
        let user_manage = Capability::new("user_manage", "Manage Users", Some(users.cap_id));
        let warranty = Capability::new("warranty", "Warranty", None).with_sort_order(3);
        let device_transfer = Capability::new("device_transfer", "Device Transfer", None).with_sort_order(4);
        let store_manage = Capability::new("store_manage", "Stores", None).with_sort_order(5);

        for cap in [
            dashboard,
            battery_list,
            battery_detail,
            battery_control,
            users,
            user_manage,
            warranty,
            device_transfer,
            store_manage,
        ] {
            self.store
                .insert_capability(cap)
                .expect("Failed to insert capability");
        }
    }

    pub async fn roles_of(&self, user_id: Uuid) -> Vec<String> {
        use org_service::services::PolicyEngine;
        self.engine
            .roles_for_user(&format!("user:{}", user_id))
            .await
            .expect("Failed to read roles")
    }

    pub async fn template_role_holders(&self, template: DealerTemplate) -> Vec<String> {
        use org_service::services::PolicyEngine;
        self.engine
            .users_for_role(&template.role_name())
            .await
            .expect("Failed to read role members")
    }
}

pub fn request(label: &str, node_type: OrgType, parent: Option<Uuid>) -> CreateOrgNodeRequest {
    CreateOrgNodeRequest {
        node_label: label.to_string(),
        node_type_code: node_type,
        parent_org_node_id: parent,
        contact: ContactFields::default(),
    }
}

/// factory A -> dealer B -> store C
pub async fn factory_dealer_store(h: &Harness) -> (Uuid, Uuid, Uuid) {
    let a = h.org("A", OrgType::Factory, None).await;
    let b = h.org("B", OrgType::Dealer, Some(a)).await;
    let c = h.org("C", OrgType::Store, Some(b)).await;
    (a, b, c)
}
