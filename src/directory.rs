use crate::attributes::RoleAttrs;
use crate::privilege::{Privilege, PrivilegeSet, QualifiedTable};
use anyhow::Result;
use log::debug;
use std::collections::BTreeSet;
use thiserror::Error;

/// The implicit role every role is a member of.
pub const PUBLIC_ROLE: &str = "PUBLIC";

/// Password column of a role, as far as the connected user can see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPassword {
    /// `pg_authid` is not accessible (e.g. managed cloud instances)
    Unreadable,
    Absent,
    Hash(String),
}

/// Typed view of one role row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSnapshot {
    pub attrs: RoleAttrs,
    pub password: StoredPassword,
    /// expiry in the server's text form, `None` when never set
    pub valid_until: Option<String>,
    /// -1 means unlimited
    pub conn_limit: i32,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("insufficient privilege: {0}")]
    AccessDenied(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read-only access to the role catalog of a cluster.
///
/// Implementors provide the raw lookups; existence of `PUBLIC`, the
/// `pg_authid` -> `pg_roles` fallback and ACL decoding are shared.
pub trait Catalog {
    /// `server_version_num` of the connected server
    fn server_version(&self) -> u32;

    fn find_role(&mut self, name: &str) -> Result<bool>;

    /// Full row including the password hash.
    fn read_authid(&mut self, name: &str) -> Result<Option<AttributeSnapshot>, ReadError>;

    /// Reduced row without the password hash.
    fn read_roles(&mut self, name: &str) -> Result<Option<AttributeSnapshot>>;

    /// Groups `member` currently belongs to.
    fn groups_of(&mut self, member: &str) -> Result<BTreeSet<String>>;

    /// Direct members of `group`.
    fn members_of(&mut self, group: &str) -> Result<BTreeSet<String>>;

    fn table_privileges(&mut self, role: &str, table: &QualifiedTable) -> Result<PrivilegeSet>;

    /// Raw `datacl` of a database in text form, `None` when unset.
    fn database_acl(&mut self, database: &str) -> Result<Option<String>>;

    /// Coerce a date/time literal the way the server stores `VALID UNTIL`.
    fn resolve_timestamp(&mut self, literal: &str) -> Result<String>;

    fn role_exists(&mut self, name: &str) -> Result<bool> {
        if name == PUBLIC_ROLE {
            return Ok(true);
        }
        self.find_role(name)
    }

    /// Attribute snapshot of a role. With `with_password` the privileged
    /// catalog is tried first and an access failure silently falls back
    /// to the reduced view, where the password reads as unreadable.
    fn role_attributes(
        &mut self,
        name: &str,
        with_password: bool,
    ) -> Result<Option<AttributeSnapshot>> {
        if with_password {
            match self.read_authid(name) {
                Ok(snapshot) => return Ok(snapshot),
                Err(ReadError::AccessDenied(reason)) => {
                    debug!("pg_authid not readable ({}), using pg_roles", reason);
                }
                Err(ReadError::Other(e)) => return Err(e),
            }
        }
        self.read_roles(name)
    }

    fn is_member(&mut self, group: &str, member: &str) -> Result<bool> {
        Ok(self.groups_of(member)?.contains(group))
    }

    fn database_privileges(&mut self, role: &str, database: &str) -> Result<PrivilegeSet> {
        Ok(self
            .database_acl(database)?
            .map(|acl| decode_acl(&acl, role))
            .unwrap_or_default())
    }
}

/// Privileges `role` holds according to a database ACL such as
/// `{=Tc/postgres,postgres=CTc/postgres,"my role"=c/postgres}`.
///
/// The empty grantee is `PUBLIC`. Grant-option markers are ignored and
/// entries from several grantors are merged.
pub fn decode_acl(acl: &str, role: &str) -> PrivilegeSet {
    let grantee = if role == PUBLIC_ROLE { "" } else { role };

    split_acl_array(acl)
        .iter()
        .filter_map(|item| parse_acl_item(item))
        .filter(|(name, _)| name == grantee)
        .flat_map(|(_, letters)| {
            letters
                .chars()
                .filter_map(|c| match c {
                    'C' => Some(Privilege::Create),
                    'T' => Some(Privilege::Temporary),
                    'c' => Some(Privilege::Connect),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Split the text form of an `aclitem[]` into items, undoing array quoting.
fn split_acl_array(acl: &str) -> Vec<String> {
    let body = acl.trim().trim_start_matches('{').trim_end_matches('}');

    let mut items = vec![];
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ',' if !quoted => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        items.push(current);
    }

    items
}

/// `grantee=privileges/grantor` -> (grantee, privileges)
fn parse_acl_item(item: &str) -> Option<(String, String)> {
    let mut grantee = String::new();
    let mut chars = item.chars().peekable();

    if chars.peek() == Some(&'"') {
        chars.next();
        loop {
            match chars.next()? {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    grantee.push('"');
                }
                '"' => break,
                c => grantee.push(c),
            }
        }
        if chars.next()? != '=' {
            return None;
        }
    } else {
        loop {
            match chars.next()? {
                '=' => break,
                c => grantee.push(c),
            }
        }
    }

    let privileges = chars.take_while(|c| *c != '/').collect();
    Some((grantee, privileges))
}
