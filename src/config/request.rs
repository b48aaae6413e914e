use crate::attributes::Capabilities;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MembershipRequest, UserRequest};

/// Whether the described state should exist or not.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Present,
    Absent,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            State::Present => write!(f, "present"),
            State::Absent => write!(f, "absent"),
        }
    }
}

/// One unit of desired state, reconciled in its own transaction.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    User(UserRequest),
    Membership(MembershipRequest),
}

impl Request {
    pub fn validate(&self, capabilities: &Capabilities) -> Result<(), ValidationError> {
        match self {
            Request::User(user) => user.validate(capabilities).map(|_| ()),
            Request::Membership(membership) => membership.validate().map(|_| ()),
        }
    }

    pub fn state(&self) -> State {
        match self {
            Request::User(user) => user.state,
            Request::Membership(membership) => membership.state,
        }
    }

    /// Database the connection should be re-targeted to.
    pub fn database(&self) -> Option<&str> {
        match self {
            Request::User(user) => user.db.as_deref(),
            Request::Membership(membership) => membership.db.as_deref(),
        }
    }

    /// Every role the request names.
    pub fn roles(&self) -> Vec<String> {
        let mut roles = match self {
            Request::User(user) => {
                let mut roles = vec![user.name.trim().to_string()];
                roles.extend(user.groups.iter().map(|g| g.trim().to_string()));
                roles
            }
            Request::Membership(membership) => membership
                .groups
                .iter()
                .chain(membership.target_roles.iter())
                .map(|r| r.trim().to_string())
                .collect(),
        };
        roles.retain(|r| !r.is_empty());
        roles.sort();
        roles.dedup();
        roles
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Request::User(user) => write!(f, "user {} ({})", user.name, user.state),
            Request::Membership(membership) => write!(
                f,
                "membership {} -> {} ({})",
                membership.groups.join(","),
                membership.target_roles.join(","),
                membership.state
            ),
        }
    }
}
