use crate::error::ValidationError;
use crate::planner::normalize_names;
use serde::{Deserialize, Serialize};

use super::State;

fn default_true() -> bool {
    true
}

/// Grant groups to (or revoke them from) target roles.
///
/// For example:
///
/// ```yaml
/// - type: membership
///   groups:
///     - read_only
///   target_roles:
///     - alice
///     - bob
///   fail_on_role: false
///   state: present
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MembershipRequest {
    #[serde(alias = "source_roles")]
    pub groups: Vec<String>,
    #[serde(alias = "users")]
    pub target_roles: Vec<String>,
    #[serde(default = "default_true")]
    pub fail_on_role: bool,
    #[serde(default)]
    pub state: State,
    #[serde(default, alias = "login_db")]
    pub db: Option<String>,
}

/// Trimmed, de-duplicated role lists of a membership request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMembership {
    pub groups: Vec<String>,
    pub target_roles: Vec<String>,
}

impl MembershipRequest {
    pub fn new(groups: &[&str], target_roles: &[&str]) -> Self {
        Self {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            target_roles: target_roles.iter().map(|r| r.to_string()).collect(),
            fail_on_role: true,
            state: State::Present,
            db: None,
        }
    }

    pub fn validate(&self) -> Result<ValidatedMembership, ValidationError> {
        let groups = normalize_names(&self.groups);
        if groups.is_empty() {
            return Err(ValidationError::Empty("groups"));
        }

        let target_roles = normalize_names(&self.target_roles);
        if target_roles.is_empty() {
            return Err(ValidationError::Empty("target_roles"));
        }

        Ok(ValidatedMembership {
            groups,
            target_roles,
        })
    }
}
