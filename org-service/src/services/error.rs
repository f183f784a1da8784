use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrgError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Org node belongs to a different tenant")]
    CrossTenant,

    #[error("Org node still has {0} child org(s)")]
    HasChildren(u64),

    #[error("Org node still owns {0} device(s)")]
    HasDevices(u64),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Policy engine error: {0}")]
    PolicyEngine(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrgError {
    pub fn is_validation(&self) -> bool {
        matches!(self, OrgError::Validation(_) | OrgError::InvalidTemplate(_))
    }

    /// Absent, or present in another tenant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrgError::NotFound(_) | OrgError::CrossTenant)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, OrgError::HasChildren(_) | OrgError::HasDevices(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, OrgError::PermissionDenied(_))
    }

    /// Store or policy-engine failure.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            OrgError::Database(_) | OrgError::PolicyEngine(_) | OrgError::Internal(_)
        )
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        OrgError::Internal(anyhow::anyhow!("{} mutex poisoned", what))
    }
}

impl From<validator::ValidationErrors> for OrgError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrgError::Validation(err.to_string())
    }
}

impl From<OrgError> for AppError {
    fn from(err: OrgError) -> Self {
        match err {
            OrgError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            OrgError::InvalidTemplate(e) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid template: {}", e))
            }
            OrgError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            OrgError::CrossTenant => AppError::NotFound(anyhow::anyhow!("Org node not found")),
            OrgError::HasChildren(n) => {
                AppError::Conflict(anyhow::anyhow!("Org node still has {} child org(s)", n))
            }
            OrgError::HasDevices(n) => {
                AppError::Conflict(anyhow::anyhow!("Org node still owns {} device(s)", n))
            }
            OrgError::PermissionDenied(e) => AppError::Forbidden(anyhow::anyhow!(e)),
            OrgError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            OrgError::PolicyEngine(e) => AppError::InternalError(e),
            OrgError::Internal(e) => AppError::InternalError(e),
        }
    }
}
