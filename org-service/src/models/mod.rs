pub mod capability;
pub mod context;
pub mod org_node;
pub mod org_node_path;
pub mod org_type_permission;
pub mod template;
pub mod user_ref;

pub use capability::{Capability, MenuNode};
pub use context::{PrivilegeTier, RequestContext, ScopeAnchor};
pub use org_node::{
    ContactFields, CreateOrgNodeRequest, OrgNode, OrgNodeFilter, OrgRollup, OrgState,
    OrgTreeNode, OrgType, Page, PageRequest, UnknownCode, UpdateOrgNodeRequest,
};
pub use org_node_path::OrgNodePath;
pub use org_type_permission::OrgTypePermission;
pub use template::{DealerTemplate, DealerTemplateState, TemplateDescriptor, DEALER_TEMPLATES};
pub use user_ref::{user_subject, UserRef};
