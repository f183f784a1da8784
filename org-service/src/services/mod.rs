//! Services layer for org-service.
//!
//! Storage and policy-engine seams are traits; `OrgCore` wires one store and
//! one engine into the closure index, scope resolver, org service and
//! provisioner.

use std::sync::Arc;

pub mod closure;
pub mod error;
mod memory_store;
pub mod menu;
mod org;
mod pg_store;
pub mod policy_engine;
mod provisioner;
pub mod scope;
mod store;

pub use closure::{ClosureIndex, ClosureReport};
pub use error::OrgError;
pub use memory_store::MemoryOrgStore;
pub use menu::{build_menu_tree, prune_menu_tree};
pub use org::{build_org_tree, OrgService};
pub use pg_store::PgOrgStore;
pub use policy_engine::{CasbinPolicyEngine, MockPolicyEngine, PolicyEngine, POLICY_MODEL};
pub use provisioner::{org_type_role, PermissionTemplateProvisioner, ReconcileReport};
pub use scope::{Scope, ScopeResolver};
pub use store::{DeviceOwnership, OrgStore, UserDirectory};

/// Everything a caller needs, sharing one store and one policy engine.
#[derive(Clone)]
pub struct OrgCore {
    pub store: Arc<dyn OrgStore>,
    pub engine: Arc<dyn PolicyEngine>,
    pub closure: ClosureIndex,
    pub scope: ScopeResolver,
    pub orgs: OrgService,
    pub provisioner: PermissionTemplateProvisioner,
}

impl OrgCore {
    /// Wire a store that also serves the user and device lookups.
    pub fn new<S>(store: Arc<S>, engine: Arc<dyn PolicyEngine>) -> Self
    where
        S: OrgStore + UserDirectory + DeviceOwnership + 'static,
    {
        let orgs: Arc<dyn OrgStore> = store.clone();
        let users: Arc<dyn UserDirectory> = store.clone();
        let devices: Arc<dyn DeviceOwnership> = store;
        Self::with_collaborators(orgs, users, devices, engine)
    }

    pub fn with_collaborators(
        store: Arc<dyn OrgStore>,
        users: Arc<dyn UserDirectory>,
        devices: Arc<dyn DeviceOwnership>,
        engine: Arc<dyn PolicyEngine>,
    ) -> Self {
        let closure = ClosureIndex::new(store.clone());
        let scope = ScopeResolver::new(closure.clone());
        let orgs = OrgService::new(store.clone(), devices, closure.clone(), scope.clone());
        let provisioner = PermissionTemplateProvisioner::new(
            store.clone(),
            users,
            engine.clone(),
            closure.clone(),
            scope.clone(),
        );

        Self {
            store,
            engine,
            closure,
            scope,
            orgs,
            provisioner,
        }
    }

    pub async fn health_check(&self) -> Result<(), OrgError> {
        self.store.health_check().await?;
        self.engine.health_check().await
    }
}
