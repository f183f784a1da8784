//! Policy-engine seam.
//!
//! The engine stores `(role, permission)` facts and `(user, role)` grouping
//! facts and evaluates allow/deny. This crate only writes and reads facts.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi};
use tokio::sync::RwLock;

use super::OrgError;

/// RBAC model: a subject holds a permission directly or through a role.
pub const POLICY_MODEL: &str = r#"
[request_definition]
r = sub, obj

[policy_definition]
p = sub, obj

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj
"#;

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn health_check(&self) -> Result<(), OrgError>;

    /// Add a `(role, permission)` fact. Adding an existing fact is a no-op.
    async fn add_permission(&self, role: &str, permission: &str) -> Result<(), OrgError>;

    /// Remove every permission fact of a role.
    async fn clear_role_permissions(&self, role: &str) -> Result<(), OrgError>;

    async fn role_permissions(&self, role: &str) -> Result<Vec<String>, OrgError>;

    /// Add a `(user, role)` grouping fact. Adding an existing fact is a no-op.
    async fn add_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError>;

    /// Remove a `(user, role)` grouping fact. Removing a missing fact is a no-op.
    async fn remove_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError>;

    /// Direct role memberships of a user, sorted.
    async fn roles_for_user(&self, user: &str) -> Result<Vec<String>, OrgError>;

    /// Direct members of a role, sorted.
    async fn users_for_role(&self, role: &str) -> Result<Vec<String>, OrgError>;
}

fn engine_error(action: &str, err: casbin::Error) -> OrgError {
    tracing::error!(error = %err, "Policy engine failed to {}", action);
    OrgError::PolicyEngine(anyhow::anyhow!("Failed to {}: {}", action, err))
}

/// Casbin-backed engine.
///
/// Facts live in the enforcer's adapter; this process only holds the enforcer.
pub struct CasbinPolicyEngine {
    enforcer: RwLock<Enforcer>,
}

impl CasbinPolicyEngine {
    pub fn new(enforcer: Enforcer) -> Self {
        Self {
            enforcer: RwLock::new(enforcer),
        }
    }

    /// In-memory enforcer over the embedded model, or over `model_path` if given.
    pub async fn in_memory(model_path: Option<&str>) -> Result<Self, OrgError> {
        let model = match model_path {
            Some(path) => {
                tracing::info!(path = %path, "Loading policy model from file");
                DefaultModel::from_file(path)
                    .await
                    .map_err(|e| engine_error("load policy model", e))?
            }
            None => DefaultModel::from_str(POLICY_MODEL)
                .await
                .map_err(|e| engine_error("load policy model", e))?,
        };
        let enforcer = Enforcer::new(model, MemoryAdapter::default())
            .await
            .map_err(|e| engine_error("create enforcer", e))?;
        Ok(Self::new(enforcer))
    }

    /// Evaluate whether `subject` holds `permission`, directly or through a role.
    pub async fn enforce(&self, subject: &str, permission: &str) -> Result<bool, OrgError> {
        self.enforcer
            .read()
            .await
            .enforce((subject, permission))
            .map_err(|e| engine_error("evaluate request", e))
    }
}

#[async_trait]
impl PolicyEngine for CasbinPolicyEngine {
    /// Evaluates a request no fact can match, so the model and matcher must load.
    async fn health_check(&self) -> Result<(), OrgError> {
        if self.enforce("health:sentinel", "health:sentinel").await? {
            return Err(OrgError::PolicyEngine(anyhow::anyhow!(
                "Policy engine allowed an unmatched request"
            )));
        }
        Ok(())
    }

    async fn add_permission(&self, role: &str, permission: &str) -> Result<(), OrgError> {
        self.enforcer
            .write()
            .await
            .add_policy(vec![role.to_string(), permission.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| engine_error("add permission", e))
    }

    async fn clear_role_permissions(&self, role: &str) -> Result<(), OrgError> {
        self.enforcer
            .write()
            .await
            .remove_filtered_policy(0, vec![role.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| engine_error("clear role permissions", e))
    }

    async fn role_permissions(&self, role: &str) -> Result<Vec<String>, OrgError> {
        let rules = self
            .enforcer
            .read()
            .await
            .get_filtered_policy(0, vec![role.to_string()]);
        let permissions: BTreeSet<String> =
            rules.into_iter().filter_map(|r| r.get(1).cloned()).collect();
        Ok(permissions.into_iter().collect())
    }

    async fn add_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError> {
        self.enforcer
            .write()
            .await
            .add_grouping_policy(vec![user.to_string(), role.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| engine_error("add role for user", e))
    }

    async fn remove_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError> {
        self.enforcer
            .write()
            .await
            .remove_grouping_policy(vec![user.to_string(), role.to_string()])
            .await
            .map(|_| ())
            .map_err(|e| engine_error("remove role for user", e))
    }

    async fn roles_for_user(&self, user: &str) -> Result<Vec<String>, OrgError> {
        let rules = self
            .enforcer
            .read()
            .await
            .get_filtered_grouping_policy(0, vec![user.to_string()]);
        let roles: BTreeSet<String> = rules.into_iter().filter_map(|r| r.get(1).cloned()).collect();
        Ok(roles.into_iter().collect())
    }

    async fn users_for_role(&self, role: &str) -> Result<Vec<String>, OrgError> {
        let rules = self
            .enforcer
            .read()
            .await
            .get_filtered_grouping_policy(1, vec![role.to_string()]);
        let users: BTreeSet<String> = rules.into_iter().filter_map(|r| r.first().cloned()).collect();
        Ok(users.into_iter().collect())
    }
}

/// In-memory engine for tests.
///
/// `fail_writes` / `fail_after_writes` make writes fail so partial-provisioning
/// paths can be exercised.
pub struct MockPolicyEngine {
    pub permissions: Mutex<HashMap<String, BTreeSet<String>>>,
    pub groupings: Mutex<HashMap<String, BTreeSet<String>>>,
    write_budget: AtomicUsize,
}

impl Default for MockPolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPolicyEngine {
    pub fn new() -> Self {
        Self {
            permissions: Mutex::new(HashMap::new()),
            groupings: Mutex::new(HashMap::new()),
            write_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Every following write fails.
    pub fn fail_writes(&self) {
        self.write_budget.store(0, Ordering::SeqCst);
    }

    /// Allow `n` more writes, then fail.
    pub fn fail_after_writes(&self, n: usize) {
        self.write_budget.store(n, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.write_budget.store(usize::MAX, Ordering::SeqCst);
    }

    fn take_write(&self) -> Result<(), OrgError> {
        let taken = self
            .write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            });
        match taken {
            Ok(_) => Ok(()),
            Err(_) => Err(OrgError::PolicyEngine(anyhow::anyhow!(
                "Mock policy engine rejected write"
            ))),
        }
    }
}

#[async_trait]
impl PolicyEngine for MockPolicyEngine {
    async fn health_check(&self) -> Result<(), OrgError> {
        Ok(())
    }

    async fn add_permission(&self, role: &str, permission: &str) -> Result<(), OrgError> {
        self.take_write()?;
        self.permissions
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy permissions"))?
            .entry(role.to_string())
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    async fn clear_role_permissions(&self, role: &str) -> Result<(), OrgError> {
        self.take_write()?;
        self.permissions
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy permissions"))?
            .remove(role);
        Ok(())
    }

    async fn role_permissions(&self, role: &str) -> Result<Vec<String>, OrgError> {
        let permissions = self
            .permissions
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy permissions"))?
            .get(role)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default();
        Ok(permissions)
    }

    async fn add_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError> {
        self.take_write()?;
        self.groupings
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy groupings"))?
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn remove_role_for_user(&self, user: &str, role: &str) -> Result<(), OrgError> {
        self.take_write()?;
        let mut groupings = self
            .groupings
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy groupings"))?;
        if let Some(roles) = groupings.get_mut(user) {
            roles.remove(role);
            if roles.is_empty() {
                groupings.remove(user);
            }
        }
        Ok(())
    }

    async fn roles_for_user(&self, user: &str) -> Result<Vec<String>, OrgError> {
        let roles = self
            .groupings
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy groupings"))?
            .get(user)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        Ok(roles)
    }

    async fn users_for_role(&self, role: &str) -> Result<Vec<String>, OrgError> {
        let users: BTreeSet<String> = self
            .groupings
            .lock()
            .map_err(|_| OrgError::lock_poisoned("Mock policy groupings"))?
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(user, _)| user.clone())
            .collect();
        Ok(users.into_iter().collect())
    }
}
