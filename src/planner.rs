use crate::attributes::{detect_changes, AttributeChanges, AttributeRequest};
use crate::directory::{Catalog, PUBLIC_ROLE};
use crate::error::{ReconcileError, ValidationError};
use crate::privilege::{diff, PrivObject, PrivilegeSet};
use crate::sql::Statement;
use log::{debug, warn};

/// Roles of a request after the missing-role policy has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRoles {
    pub groups: Vec<String>,
    pub members: Vec<String>,
    /// (group, member) pairs left to converge
    pub pairs: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

/// Trim role names and drop duplicates, keeping the first occurrence.
pub fn normalize_names(names: &[String]) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Keep the roles that exist. A missing role is an error when
/// `fail_on_role` is set, otherwise it is dropped with a warning.
pub fn retain_existing<C: Catalog>(
    catalog: &mut C,
    names: &[String],
    fail_on_role: bool,
    warnings: &mut Vec<String>,
) -> Result<Vec<String>, ReconcileError> {
    let mut existing = vec![];
    for name in names {
        if catalog.role_exists(name)? {
            existing.push(name.clone());
        } else if fail_on_role {
            return Err(ReconcileError::MissingRole { role: name.clone() });
        } else {
            let message = format!("Role {} does not exist, pass", name);
            warn!("{}", message);
            warnings.push(message);
        }
    }
    Ok(existing)
}

/// Cross groups with members. A role cannot be a member of itself: that
/// pair fails the request under `fail_on_role`, otherwise it is skipped.
pub fn membership_pairs(
    groups: &[String],
    members: &[String],
    fail_on_role: bool,
    warnings: &mut Vec<String>,
) -> Result<Vec<(String, String)>, ReconcileError> {
    let mut pairs = vec![];
    for group in groups {
        for member in members {
            if group == member {
                if fail_on_role {
                    return Err(ReconcileError::SelfMembership {
                        role: member.clone(),
                    });
                }
                let message = format!("Role '{}' is a member of role '{}', pass", member, group);
                warn!("{}", message);
                warnings.push(message);
                continue;
            }
            pairs.push((group.clone(), member.clone()));
        }
    }
    Ok(pairs)
}

/// Check every named group and member before anything is planned.
pub fn resolve_roles<C: Catalog>(
    catalog: &mut C,
    groups: &[String],
    members: &[String],
    fail_on_role: bool,
) -> Result<ResolvedRoles, ReconcileError> {
    let mut warnings = vec![];
    let groups = retain_existing(catalog, &normalize_names(groups), fail_on_role, &mut warnings)?;
    let members = retain_existing(catalog, &normalize_names(members), fail_on_role, &mut warnings)?;
    let pairs = membership_pairs(&groups, &members, fail_on_role, &mut warnings)?;

    Ok(ResolvedRoles {
        groups,
        members,
        pairs,
        warnings,
    })
}

/// Reject any attribute change on `PUBLIC`.
pub fn check_mutable(role: &str, request: &AttributeRequest) -> Result<(), ReconcileError> {
    if role != PUBLIC_ROLE {
        return Ok(());
    }

    let attempted = if request.password.is_some() {
        Some("password")
    } else if !request.flags.is_empty() {
        Some("role_attr_flags")
    } else if request.expires.is_some() {
        Some("expires")
    } else if request.conn_limit.is_some() {
        Some("conn_limit")
    } else {
        None
    };

    match attempted {
        Some(attempted) => Err(ReconcileError::ImmutableRole {
            role: role.to_string(),
            attempted: attempted.to_string(),
        }),
        None => Ok(()),
    }
}

/// CREATE for a missing role, ALTER with only the changed clauses for an
/// existing one, nothing when it already matches.
pub fn plan_role<C: Catalog>(
    catalog: &mut C,
    role: &str,
    request: &AttributeRequest,
    no_password_changes: bool,
) -> Result<Option<Statement>, ReconcileError> {
    check_mutable(role, request)?;

    // A literal the server cannot coerce fails before CREATE as well as ALTER
    let resolved_expiry = match &request.expires {
        Some(expires) => Some(catalog.resolve_timestamp(expires).map_err(|e| {
            ValidationError::InvalidExpiry {
                value: expires.clone(),
                reason: format!("{:#}", e),
            }
        })?),
        None => None,
    };

    if !catalog.role_exists(role)? {
        return Ok(Some(Statement::CreateRole {
            role: role.to_string(),
            attributes: AttributeChanges::for_new_role(request),
        }));
    }

    if request.is_empty() || role == PUBLIC_ROLE {
        return Ok(None);
    }

    let current = catalog
        .role_attributes(role, !no_password_changes)?
        .ok_or_else(|| ReconcileError::MissingRole {
            role: role.to_string(),
        })?;

    let changes = detect_changes(
        role,
        &current,
        request,
        resolved_expiry.as_deref(),
        no_password_changes,
    );
    debug!("attribute changes for {}: {:?}", role, changes);

    if changes.is_empty() {
        return Ok(None);
    }

    Ok(Some(Statement::AlterRole {
        role: role.to_string(),
        attributes: changes,
    }))
}

fn held_privileges<C: Catalog>(
    catalog: &mut C,
    role: &str,
    object: &PrivObject,
) -> anyhow::Result<PrivilegeSet> {
    match object {
        PrivObject::Database(database) => catalog.database_privileges(role, database),
        PrivObject::Table(table) => catalog.table_privileges(role, table),
    }
}

/// GRANT the desired privileges the role is missing on one object.
pub fn plan_grant<C: Catalog>(
    catalog: &mut C,
    role: &str,
    object: &PrivObject,
    desired: &PrivilegeSet,
) -> Result<Option<Statement>, ReconcileError> {
    let held = held_privileges(catalog, role, object)?;
    let d = diff(&held, desired);
    if d.desired_only.is_empty() {
        return Ok(None);
    }

    Ok(Some(Statement::Grant {
        object: object.clone(),
        privileges: d.desired_only,
        role: role.to_string(),
    }))
}

/// REVOKE the privileges being removed that the role still holds.
pub fn plan_revoke<C: Catalog>(
    catalog: &mut C,
    role: &str,
    object: &PrivObject,
    removed: &PrivilegeSet,
) -> Result<Option<Statement>, ReconcileError> {
    let held = held_privileges(catalog, role, object)?;
    let d = diff(&held, removed);
    if d.both.is_empty() {
        return Ok(None);
    }

    Ok(Some(Statement::Revoke {
        object: object.clone(),
        privileges: d.both,
        role: role.to_string(),
    }))
}

/// GRANT or REVOKE one group membership, re-reading it every time.
pub fn plan_membership<C: Catalog>(
    catalog: &mut C,
    group: &str,
    member: &str,
    present: bool,
) -> Result<Option<Statement>, ReconcileError> {
    let is_member = catalog.is_member(group, member)?;

    let statement = match (present, is_member) {
        (true, false) => Some(Statement::GrantMembership {
            group: group.to_string(),
            member: member.to_string(),
        }),
        (false, true) => Some(Statement::RevokeMembership {
            group: group.to_string(),
            member: member.to_string(),
        }),
        _ => None,
    };

    Ok(statement)
}
