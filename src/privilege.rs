use crate::error::ValidationError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Object type a privilege applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Database,
    Table,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectKind::Database => write!(f, "database"),
            ObjectKind::Table => write!(f, "table"),
        }
    }
}

impl ObjectKind {
    /// Every privilege of this kind, i.e. what `ALL` expands to.
    pub fn privileges(&self) -> &'static [Privilege] {
        match self {
            ObjectKind::Database => &[
                Privilege::Create,
                Privilege::Connect,
                Privilege::Temporary,
            ],
            ObjectKind::Table => &[
                Privilege::Select,
                Privilege::Insert,
                Privilege::Update,
                Privilege::Delete,
                Privilege::Truncate,
                Privilege::References,
                Privilege::Trigger,
            ],
        }
    }
}

/// A table or database privilege. `ALL` and `TEMP` only exist in request
/// strings and are normalized away by [`parse_privilege_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    References,
    Trigger,
    Create,
    Connect,
    Temporary,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Update => "UPDATE",
            Privilege::Delete => "DELETE",
            Privilege::Truncate => "TRUNCATE",
            Privilege::References => "REFERENCES",
            Privilege::Trigger => "TRIGGER",
            Privilege::Create => "CREATE",
            Privilege::Connect => "CONNECT",
            Privilege::Temporary => "TEMPORARY",
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Privilege::Create | Privilege::Connect | Privilege::Temporary => ObjectKind::Database,
            _ => ObjectKind::Table,
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = String;

    /// Parse a canonical privilege name as reported by the catalog.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let privilege = match s {
            "SELECT" => Privilege::Select,
            "INSERT" => Privilege::Insert,
            "UPDATE" => Privilege::Update,
            "DELETE" => Privilege::Delete,
            "TRUNCATE" => Privilege::Truncate,
            "REFERENCES" => Privilege::References,
            "TRIGGER" => Privilege::Trigger,
            "CREATE" => Privilege::Create,
            "CONNECT" => Privilege::Connect,
            "TEMPORARY" => Privilege::Temporary,
            other => return Err(format!("unknown privilege: {}", other)),
        };

        Ok(privilege)
    }
}

pub type PrivilegeSet = BTreeSet<Privilege>;

/// Render a privilege set the way GRANT/REVOKE expects it: `SELECT, INSERT`.
pub fn join_privileges(privileges: &PrivilegeSet) -> String {
    privileges
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a comma-separated privilege list for the given object kind.
///
/// Tokens are case-insensitive. `ALL` expands to every privilege of the
/// kind and `TEMP` is an alias of `TEMPORARY`. Any token not valid for
/// the kind is reported, all of them at once.
pub fn parse_privilege_list(kind: ObjectKind, list: &str) -> Result<PrivilegeSet, ValidationError> {
    let tokens = list
        .split(',')
        .map(|t| t.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .collect::<BTreeSet<_>>();

    let mut privileges = PrivilegeSet::new();
    let mut invalid = vec![];
    for token in tokens {
        match (kind, token.as_str()) {
            (_, "ALL") => privileges.extend(kind.privileges()),
            (ObjectKind::Database, "TEMP") => {
                privileges.insert(Privilege::Temporary);
            }
            (_, name) => match Privilege::from_str(name) {
                Ok(p) if p.kind() == kind => {
                    privileges.insert(p);
                }
                _ => invalid.push(token.clone()),
            },
        }
    }

    if !invalid.is_empty() {
        return Err(ValidationError::InvalidPrivileges {
            kind,
            tokens: invalid,
        });
    }

    Ok(privileges)
}

/// A table name qualified by its schema, `public` when none is given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedTable {
    pub schema: String,
    pub name: String,
}

impl QualifiedTable {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    /// `orders` -> `public.orders`, `sales.orders` -> `sales.orders`
    pub fn parse(table: &str) -> Self {
        match table.split_once('.') {
            Some((schema, name)) => Self::new(schema.trim(), name.trim()),
            None => Self::new("public", table.trim()),
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// The object a privilege is granted on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivObject {
    Database(String),
    Table(QualifiedTable),
}

impl PrivObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            PrivObject::Database(_) => ObjectKind::Database,
            PrivObject::Table(_) => ObjectKind::Table,
        }
    }
}

impl fmt::Display for PrivObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrivObject::Database(name) => write!(f, "database {}", name),
            PrivObject::Table(table) => write!(f, "table {}", table),
        }
    }
}

/// Desired privileges per object, as parsed from a `priv` string.
pub type PrivilegeRequest = BTreeMap<PrivObject, PrivilegeSet>;

/// Parse a slash-separated privilege string such as
/// `CONNECT/orders:SELECT,INSERT/sales.items:ALL`.
///
/// Tokens without a `:` are database privileges on `db`; the others are
/// `table:privileges`. A later token for the same object replaces an
/// earlier one. A database context is required as soon as any privilege
/// is requested, because table privileges are resolved inside it too.
pub fn parse_privs(privs: &str, db: Option<&str>) -> Result<PrivilegeRequest, ValidationError> {
    let db = db
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(ValidationError::MissingDatabase)?;

    let mut request = PrivilegeRequest::new();
    for token in privs.split('/').filter(|t| !t.trim().is_empty()) {
        let (object, privileges) = match token.split_once(':') {
            Some((table, list)) => (
                PrivObject::Table(QualifiedTable::parse(table)),
                parse_privilege_list(ObjectKind::Table, list)?,
            ),
            None => (
                PrivObject::Database(db.to_string()),
                parse_privilege_list(ObjectKind::Database, token)?,
            ),
        };
        request.insert(object, privileges);
    }

    Ok(request)
}

/// Partition of held and desired privileges for one (role, object) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegeDiff {
    /// held and desired
    pub both: PrivilegeSet,
    /// held but not desired
    pub held_only: PrivilegeSet,
    /// desired but not held
    pub desired_only: PrivilegeSet,
}

/// Compare what a role holds on an object with what is desired.
pub fn diff(held: &PrivilegeSet, desired: &PrivilegeSet) -> PrivilegeDiff {
    PrivilegeDiff {
        both: held.intersection(desired).copied().collect(),
        held_only: held.difference(desired).copied().collect(),
        desired_only: desired.difference(held).copied().collect(),
    }
}
