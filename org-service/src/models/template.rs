//! Dealer permission templates.

use serde::{Deserialize, Serialize};

/// Named bundle of capability codes applied to every user under a dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealerTemplate {
    Basic,
    Advanced,
}

/// Template lookup table. Adding a template is a new row here plus an enum variant.
pub const DEALER_TEMPLATES: &[(DealerTemplate, &[&str])] = &[
    (
        DealerTemplate::Basic,
        &["dashboard", "battery_list", "battery_detail", "user_list"],
    ),
    (
        DealerTemplate::Advanced,
        &[
            "dashboard",
            "battery_list",
            "battery_detail",
            "battery_control",
            "user_list",
            "user_manage",
            "warranty",
            "device_transfer",
            "store_manage",
        ],
    ),
];

impl DealerTemplate {
    pub fn all() -> impl Iterator<Item = DealerTemplate> {
        DEALER_TEMPLATES.iter().map(|(t, _)| *t)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DealerTemplate::Basic => "basic",
            DealerTemplate::Advanced => "advanced",
        }
    }

    /// Capability codes granted by this template.
    pub fn codes(&self) -> &'static [&'static str] {
        DEALER_TEMPLATES
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, codes)| *codes)
            .unwrap_or(&[])
    }

    /// Policy-engine role holding this template's permission facts.
    pub fn role_name(&self) -> String {
        format!("dealer_template:{}", self.as_str())
    }

    /// Reverse-map a role name to its template.
    pub fn from_role(role: &str) -> Option<DealerTemplate> {
        Self::all().find(|t| t.role_name() == role)
    }
}

impl std::fmt::Display for DealerTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DealerTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("Invalid template: {}", s))
    }
}

/// Template table entry exposed to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateDescriptor {
    pub template: DealerTemplate,
    pub role_name: String,
    pub codes: Vec<String>,
}

impl From<DealerTemplate> for TemplateDescriptor {
    fn from(t: DealerTemplate) -> Self {
        Self {
            template: t,
            role_name: t.role_name(),
            codes: t.codes().iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Result of setting or reading a dealer's template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DealerTemplateState {
    /// `None` when no scoped user carries a template role.
    pub template: Option<DealerTemplate>,
    pub role_name: Option<String>,
    pub affected_user_count: u64,
}
