//! Permission-template provisioning.
//!
//! Turns template and org-type capability selections into policy-engine facts
//! and rebinds affected users. Engine writes happen after the relational side
//! and are not transactional with it; every flow here is safe to re-run.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use super::menu::{build_menu_tree, prune_menu_tree};
use super::org::{require_org_in, require_tenant};
use super::{ClosureIndex, OrgError, OrgStore, PolicyEngine, ScopeResolver, UserDirectory};
use crate::models::{
    DealerTemplate, DealerTemplateState, MenuNode, OrgType, OrgTypePermission, RequestContext,
    TemplateDescriptor,
};

/// Policy-engine role mirroring one (tenant, org type) permission record.
pub fn org_type_role(tenant_id: Uuid, node_type: OrgType) -> String {
    format!("org_type:{}:{}", tenant_id, node_type)
}

/// Outcome of an org-type grant sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub granted: u64,
    pub revoked: u64,
}

#[derive(Clone)]
pub struct PermissionTemplateProvisioner {
    store: Arc<dyn OrgStore>,
    users: Arc<dyn UserDirectory>,
    engine: Arc<dyn PolicyEngine>,
    closure: ClosureIndex,
    scope: ScopeResolver,
}

impl PermissionTemplateProvisioner {
    pub fn new(
        store: Arc<dyn OrgStore>,
        users: Arc<dyn UserDirectory>,
        engine: Arc<dyn PolicyEngine>,
        closure: ClosureIndex,
        scope: ScopeResolver,
    ) -> Self {
        Self {
            store,
            users,
            engine,
            closure,
            scope,
        }
    }

    pub fn list_templates(&self) -> Vec<TemplateDescriptor> {
        DealerTemplate::all().map(TemplateDescriptor::from).collect()
    }

    /// Map capability codes to permission-fact identifiers. Unknown codes are
    /// logged and skipped.
    async fn resolve_permission_keys(&self, codes: &[String]) -> Result<Vec<String>, OrgError> {
        let caps = self.store.find_capabilities_by_codes(codes).await?;
        let found: HashSet<&str> = caps.iter().map(|c| c.cap_code.as_str()).collect();
        for code in codes.iter().filter(|c| !found.contains(c.as_str())) {
            tracing::warn!(cap_code = %code, "Capability code not in catalog; skipping");
        }
        Ok(caps.iter().map(|c| c.permission_key()).collect())
    }

    /// Clear a role's permission facts and write `codes` in their place.
    async fn rewrite_role(&self, role: &str, codes: &[String]) -> Result<usize, OrgError> {
        let keys = self.resolve_permission_keys(codes).await?;
        self.engine.clear_role_permissions(role).await?;
        for key in &keys {
            self.engine.add_permission(role, key).await?;
        }
        Ok(keys.len())
    }

    /// Full re-sync of every template role's permission facts.
    async fn sync_template_roles(&self) -> Result<(), OrgError> {
        for template in DealerTemplate::all() {
            let codes: Vec<String> = template.codes().iter().map(|c| c.to_string()).collect();
            let written = self.rewrite_role(&template.role_name(), &codes).await?;
            tracing::debug!(template = %template, permissions = written, "Template role synced");
        }
        Ok(())
    }

    /// Apply a dealer template to every user currently under the dealer.
    ///
    /// Other template roles are removed from those users; non-template roles
    /// are left alone. Users added later are not granted until the next call.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn set_dealer_template(
        &self,
        ctx: &RequestContext,
        dealer_id: Uuid,
        template_name: &str,
    ) -> Result<DealerTemplateState, OrgError> {
        require_tenant(ctx.tenant_id)?;
        let template: DealerTemplate = template_name
            .parse()
            .map_err(|_| OrgError::InvalidTemplate(template_name.to_string()))?;

        let dealer = require_org_in(self.store.as_ref(), ctx.tenant_id, dealer_id).await?;
        if dealer.node_type_code != OrgType::Dealer {
            return Err(OrgError::Validation(format!(
                "Org node {} is a {}, not a DEALER",
                dealer_id, dealer.node_type_code
            )));
        }
        if !self
            .scope
            .can_access(ctx.tenant_id, ctx.anchor_id(), dealer_id)
            .await?
        {
            return Err(OrgError::PermissionDenied(format!(
                "Dealer {} is outside the caller's subtree",
                dealer_id
            )));
        }

        self.sync_template_roles().await?;

        let subtree: Vec<Uuid> = self
            .closure
            .descendants_of(ctx.tenant_id, dealer_id)
            .await?
            .into_iter()
            .collect();
        let users = self.users.find_users_in_orgs(ctx.tenant_id, &subtree).await?;

        let role_name = template.role_name();
        for user in &users {
            let subject = user.subject();
            for other in DealerTemplate::all().filter(|t| *t != template) {
                self.engine
                    .remove_role_for_user(&subject, &other.role_name())
                    .await?;
            }
            self.engine.add_role_for_user(&subject, &role_name).await?;
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            dealer_id = %dealer_id,
            template = %template,
            affected_users = users.len(),
            "Dealer template applied"
        );

        Ok(DealerTemplateState {
            template: Some(template),
            role_name: Some(role_name),
            affected_user_count: users.len() as u64,
        })
    }

    /// Infer the dealer's template from the lowest-id user under it.
    ///
    /// Not a stored fact: users can hold different templates if a provisioning
    /// call was interrupted or users were added since.
    #[tracing::instrument(skip(self))]
    pub async fn get_dealer_template(
        &self,
        tenant_id: Uuid,
        dealer_id: Uuid,
    ) -> Result<DealerTemplateState, OrgError> {
        require_tenant(tenant_id)?;
        require_org_in(self.store.as_ref(), tenant_id, dealer_id).await?;

        let subtree: Vec<Uuid> = self
            .closure
            .descendants_of(tenant_id, dealer_id)
            .await?
            .into_iter()
            .collect();
        let users = self.users.find_users_in_orgs(tenant_id, &subtree).await?;
        let affected_user_count = users.len() as u64;

        let Some(representative) = users.iter().min_by_key(|u| u.user_id) else {
            return Ok(DealerTemplateState {
                template: None,
                role_name: None,
                affected_user_count,
            });
        };

        let template = self
            .engine
            .roles_for_user(&representative.subject())
            .await?
            .iter()
            .find_map(|role| DealerTemplate::from_role(role));

        Ok(DealerTemplateState {
            template,
            role_name: template.map(|t| t.role_name()),
            affected_user_count,
        })
    }

    /// Persist an org type's capability set and mirror it into the engine.
    ///
    /// Every user whose org currently has `node_type` is granted the role.
    /// Grants are additive; see [`Self::reconcile_org_type_grants`].
    #[tracing::instrument(skip(self, ctx, ui_codes), fields(tenant_id = %ctx.tenant_id))]
    pub async fn upsert_org_type_permission(
        &self,
        ctx: &RequestContext,
        node_type: OrgType,
        ui_codes: Vec<String>,
        device_param_text: &str,
    ) -> Result<OrgTypePermission, OrgError> {
        require_tenant(ctx.tenant_id)?;
        if !ctx.tier.is_privileged() {
            return Err(OrgError::PermissionDenied(
                "Only tenant administrators may change org type permissions".to_string(),
            ));
        }

        let record = OrgTypePermission::new(
            ctx.tenant_id,
            node_type,
            ui_codes,
            device_param_text.to_string(),
        );
        let saved = self.store.upsert_org_type_permission(&record).await?;

        let role = org_type_role(ctx.tenant_id, node_type);
        let written = self.rewrite_role(&role, &saved.ui_codes).await?;

        let users = self
            .users
            .find_users_by_org_type(ctx.tenant_id, node_type)
            .await?;
        for user in &users {
            self.engine.add_role_for_user(&user.subject(), &role).await?;
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            node_type = %node_type,
            permissions = written,
            affected_users = users.len(),
            "Org type permissions updated"
        );
        Ok(saved)
    }

    /// Stored capability codes for an org type; `found` is false when nothing is stored.
    pub async fn get_allowed_ui_codes(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<(Vec<String>, bool), OrgError> {
        require_tenant(tenant_id)?;
        Ok(
            match self
                .store
                .find_org_type_permission(tenant_id, node_type)
                .await?
            {
                Some(record) => (record.ui_codes, true),
                None => (Vec::new(), false),
            },
        )
    }

    pub async fn get_device_param_permissions(
        &self,
        tenant_id: Uuid,
        node_type: OrgType,
    ) -> Result<(Vec<String>, bool), OrgError> {
        require_tenant(tenant_id)?;
        Ok(
            match self
                .store
                .find_org_type_permission(tenant_id, node_type)
                .await?
            {
                Some(record) => (record.device_params(), true),
                None => (Vec::new(), false),
            },
        )
    }

    /// Bring org-type role memberships in line with users' current org types.
    ///
    /// Revokes roles from users whose org no longer has the type (or whose type
    /// has no stored permissions) and grants missing ones.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn reconcile_org_type_grants(
        &self,
        ctx: &RequestContext,
    ) -> Result<ReconcileReport, OrgError> {
        require_tenant(ctx.tenant_id)?;
        if !ctx.tier.is_privileged() {
            return Err(OrgError::PermissionDenied(
                "Only tenant administrators may reconcile org type grants".to_string(),
            ));
        }

        let configured: HashSet<OrgType> = self
            .store
            .find_org_type_permissions_by_tenant(ctx.tenant_id)
            .await?
            .into_iter()
            .map(|r| r.node_type_code)
            .collect();

        let mut report = ReconcileReport::default();
        for node_type in OrgType::ALL {
            let role = org_type_role(ctx.tenant_id, node_type);
            let expected: BTreeSet<String> = if configured.contains(&node_type) {
                self.users
                    .find_users_by_org_type(ctx.tenant_id, node_type)
                    .await?
                    .iter()
                    .map(|u| u.subject())
                    .collect()
            } else {
                BTreeSet::new()
            };
            let holders: BTreeSet<String> =
                self.engine.users_for_role(&role).await?.into_iter().collect();

            for stale in holders.difference(&expected) {
                self.engine.remove_role_for_user(stale, &role).await?;
                report.revoked += 1;
            }
            for missing in expected.difference(&holders) {
                self.engine.add_role_for_user(missing, &role).await?;
                report.granted += 1;
            }
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            granted = report.granted,
            revoked = report.revoked,
            "Org type grants reconciled"
        );
        Ok(report)
    }

    /// Prune `tree` to what the caller's org type may see.
    ///
    /// Privileged callers without an anchor, or whose org type has nothing
    /// stored, see the whole tree. Scoped callers in that position see nothing.
    pub async fn menu_for(
        &self,
        ctx: &RequestContext,
        tree: &[MenuNode],
    ) -> Result<Vec<MenuNode>, OrgError> {
        require_tenant(ctx.tenant_id)?;
        let privileged = ctx.tier.is_privileged();

        let Some(anchor) = ctx.anchor_id() else {
            return Ok(if privileged { tree.to_vec() } else { Vec::new() });
        };

        let org = require_org_in(self.store.as_ref(), ctx.tenant_id, anchor).await?;
        let (codes, found) = self
            .get_allowed_ui_codes(ctx.tenant_id, org.node_type_code)
            .await?;
        if !found {
            return Ok(if privileged { tree.to_vec() } else { Vec::new() });
        }

        let allowed: HashSet<String> = codes.into_iter().collect();
        Ok(prune_menu_tree(tree, &allowed))
    }

    /// The capability catalog as a menu, pruned for the caller.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn get_user_menu(&self, ctx: &RequestContext) -> Result<Vec<MenuNode>, OrgError> {
        let catalog = self.store.get_all_capabilities().await?;
        self.menu_for(ctx, &build_menu_tree(&catalog)).await
    }
}
