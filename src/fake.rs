//! In-memory cluster used by the unit tests.

use crate::attributes::{is_md5_hash, md5_role_hash, AttributeChanges, PasswordChange, RoleAttrs};
use crate::directory::{AttributeSnapshot, Catalog, ReadError, StoredPassword, PUBLIC_ROLE};
use crate::privilege::{Privilege, PrivilegeSet, PrivObject, QualifiedTable};
use crate::sql::{ExecError, Session, Statement};
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRole {
    pub attrs: RoleAttrs,
    pub password: Option<String>,
    pub valid_until: Option<String>,
    pub conn_limit: i32,
}

impl Default for FakeRole {
    fn default() -> Self {
        Self {
            attrs: RoleAttrs {
                login: true,
                inherit: true,
                ..Default::default()
            },
            password: None,
            valid_until: None,
            conn_limit: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct State {
    roles: BTreeMap<String, FakeRole>,
    /// (group, member)
    memberships: BTreeSet<(String, String)>,
    tables: BTreeMap<(String, QualifiedTable), PrivilegeSet>,
    /// (database, role)
    databases: BTreeMap<(String, String), PrivilegeSet>,
}

pub struct MemoryCluster {
    state: State,
    transaction: Option<State>,
    savepoints: Vec<(String, State)>,
    pub server_version: u32,
    pub authid_readable: bool,
    pub read_only: bool,
    /// roles whose DROP fails as if objects still depended on them
    pub drop_blocked: BTreeSet<String>,
    /// statements containing this text fail with a permission error
    pub reject: Option<String>,
    /// every statement that reached the cluster, successful or not
    pub received: Vec<String>,
    pub committed: bool,
    pub rolled_back: bool,
    /// COMMIT and ROLLBACK fail
    pub connection_lost: bool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: State::default(),
            transaction: None,
            savepoints: vec![],
            server_version: 150000,
            authid_readable: true,
            read_only: false,
            drop_blocked: BTreeSet::new(),
            reject: None,
            received: vec![],
            committed: false,
            rolled_back: false,
            connection_lost: false,
        }
    }

    pub fn add_role(&mut self, name: &str) -> &mut FakeRole {
        self.state.roles.entry(name.to_string()).or_default()
    }

    pub fn role(&self, name: &str) -> Option<&FakeRole> {
        self.state.roles.get(name)
    }

    pub fn add_membership(&mut self, group: &str, member: &str) {
        self.state
            .memberships
            .insert((group.to_string(), member.to_string()));
    }

    pub fn has_membership(&self, group: &str, member: &str) -> bool {
        self.state
            .memberships
            .contains(&(group.to_string(), member.to_string()))
    }

    pub fn grant_table(&mut self, role: &str, table: &QualifiedTable, privileges: &[Privilege]) {
        self.state
            .tables
            .entry((role.to_string(), table.clone()))
            .or_default()
            .extend(privileges);
    }

    pub fn grant_database(&mut self, database: &str, role: &str, privileges: &[Privilege]) {
        self.state
            .databases
            .entry((database.to_string(), role.to_string()))
            .or_default()
            .extend(privileges);
    }

    pub fn held(&self, role: &str, object: &PrivObject) -> PrivilegeSet {
        let held = match object {
            PrivObject::Database(db) => self.state.databases.get(&(db.clone(), role.to_string())),
            PrivObject::Table(t) => self.state.tables.get(&(role.to_string(), t.clone())),
        };
        held.cloned().unwrap_or_default()
    }

    fn require_role(&self, role: &str) -> Result<(), ExecError> {
        if role == PUBLIC_ROLE || self.state.roles.contains_key(role) {
            Ok(())
        } else {
            Err(ExecError::Failed(format!("role \"{}\" does not exist", role)))
        }
    }

    fn apply_attributes(role: &str, target: &mut FakeRole, changes: &AttributeChanges) {
        match &changes.password {
            Some(PasswordChange::Set(p)) if is_md5_hash(p) => target.password = Some(p.clone()),
            Some(PasswordChange::Set(p)) => target.password = Some(md5_role_hash(role, p)),
            Some(PasswordChange::Clear) => target.password = None,
            None => (),
        }
        if let Some(valid_until) = &changes.valid_until {
            target.valid_until = Some(valid_until.clone());
        }
        if let Some(limit) = changes.conn_limit {
            target.conn_limit = limit;
        }
        for (flag, value) in changes.flags.iter() {
            target.attrs.set(flag, value);
        }
    }

    fn privileges_mut(&mut self, role: &str, object: &PrivObject) -> &mut PrivilegeSet {
        match object {
            PrivObject::Database(db) => self
                .state
                .databases
                .entry((db.clone(), role.to_string()))
                .or_default(),
            PrivObject::Table(t) => self
                .state
                .tables
                .entry((role.to_string(), t.clone()))
                .or_default(),
        }
    }

    fn apply(&mut self, statement: &Statement) -> Result<(), ExecError> {
        match statement {
            Statement::CreateRole { role, attributes } => {
                if self.state.roles.contains_key(role) {
                    return Err(ExecError::Failed(format!("role \"{}\" already exists", role)));
                }
                let mut created = FakeRole::default();
                Self::apply_attributes(role, &mut created, attributes);
                self.state.roles.insert(role.clone(), created);
            }
            Statement::AlterRole { role, attributes } => {
                let target = self
                    .state
                    .roles
                    .get_mut(role)
                    .ok_or_else(|| ExecError::Failed(format!("role \"{}\" does not exist", role)))?;
                Self::apply_attributes(role, target, attributes);
            }
            Statement::DropRole { role } => {
                if self.drop_blocked.contains(role) {
                    return Err(ExecError::Failed(format!(
                        "role \"{}\" cannot be dropped because some objects depend on it",
                        role
                    )));
                }
                self.require_role(role)?;
                self.state.roles.remove(role);
                self.state
                    .memberships
                    .retain(|(g, m)| g != role && m != role);
            }
            Statement::Grant {
                object,
                privileges,
                role,
            } => {
                self.require_role(role)?;
                self.privileges_mut(role, object).extend(privileges);
            }
            Statement::Revoke {
                object,
                privileges,
                role,
            } => {
                self.require_role(role)?;
                self.privileges_mut(role, object)
                    .retain(|p| !privileges.contains(p));
            }
            Statement::GrantMembership { group, member } => {
                self.require_role(group)?;
                self.require_role(member)?;
                self.add_membership(group, member);
            }
            Statement::RevokeMembership { group, member } => {
                self.state
                    .memberships
                    .remove(&(group.clone(), member.clone()));
            }
        }
        Ok(())
    }

    fn snapshot(role: &FakeRole, password: StoredPassword) -> AttributeSnapshot {
        AttributeSnapshot {
            attrs: role.attrs,
            password,
            valid_until: role.valid_until.clone(),
            conn_limit: role.conn_limit,
        }
    }
}

/// `alice=CTc/postgres` with the quoting PostgreSQL applies.
fn acl_item(grantee: &str, privileges: &PrivilegeSet) -> String {
    let letters = privileges
        .iter()
        .filter_map(|p| match p {
            Privilege::Create => Some('C'),
            Privilege::Temporary => Some('T'),
            Privilege::Connect => Some('c'),
            _ => None,
        })
        .collect::<String>();

    if grantee.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        format!("{}={}/postgres", grantee, letters)
    } else {
        let quoted = format!("\"{}\"={}/postgres", grantee.replace('"', "\"\""), letters);
        format!("\"{}\"", quoted.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

impl Catalog for MemoryCluster {
    fn server_version(&self) -> u32 {
        self.server_version
    }

    fn find_role(&mut self, name: &str) -> Result<bool> {
        Ok(self.state.roles.contains_key(name))
    }

    fn read_authid(&mut self, name: &str) -> Result<Option<AttributeSnapshot>, ReadError> {
        if !self.authid_readable {
            return Err(ReadError::AccessDenied(
                "permission denied for table pg_authid".to_string(),
            ));
        }
        Ok(self.state.roles.get(name).map(|role| {
            let password = match &role.password {
                Some(hash) => StoredPassword::Hash(hash.clone()),
                None => StoredPassword::Absent,
            };
            Self::snapshot(role, password)
        }))
    }

    fn read_roles(&mut self, name: &str) -> Result<Option<AttributeSnapshot>> {
        Ok(self
            .state
            .roles
            .get(name)
            .map(|role| Self::snapshot(role, StoredPassword::Unreadable)))
    }

    fn groups_of(&mut self, member: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .memberships
            .iter()
            .filter(|(_, m)| m == member)
            .map(|(g, _)| g.clone())
            .collect())
    }

    fn members_of(&mut self, group: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .state
            .memberships
            .iter()
            .filter(|(g, _)| g == group)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn table_privileges(&mut self, role: &str, table: &QualifiedTable) -> Result<PrivilegeSet> {
        Ok(self.held(role, &PrivObject::Table(table.clone())))
    }

    fn database_acl(&mut self, database: &str) -> Result<Option<String>> {
        let items = self
            .state
            .databases
            .iter()
            .filter(|((db, _), privileges)| db == database && !privileges.is_empty())
            .map(|((_, role), privileges)| {
                let grantee = if role == PUBLIC_ROLE { "" } else { role.as_str() };
                acl_item(grantee, privileges)
            })
            .collect::<Vec<_>>();

        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("{{{}}}", items.join(","))))
    }

    fn resolve_timestamp(&mut self, literal: &str) -> Result<String> {
        let literal = literal.trim();
        if literal.ends_with("infinity") || literal.chars().any(|c| c.is_ascii_digit()) {
            Ok(literal.to_string())
        } else {
            Err(anyhow!(
                "invalid input syntax for type timestamp with time zone: \"{}\"",
                literal
            ))
        }
    }
}

impl Session for MemoryCluster {
    fn begin(&mut self) -> Result<()> {
        self.transaction = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.connection_lost {
            return Err(anyhow!("connection closed"));
        }
        self.transaction = None;
        self.savepoints.clear();
        self.committed = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.connection_lost {
            return Err(anyhow!("connection closed"));
        }
        if let Some(state) = self.transaction.take() {
            self.state = state;
        }
        self.savepoints.clear();
        self.rolled_back = true;
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecError> {
        self.received.push(statement.redacted());
        if self.read_only {
            return Err(ExecError::ReadOnly(
                "cannot execute statement in a read-only transaction".to_string(),
            ));
        }
        if let Some(reject) = &self.reject {
            if statement.redacted().contains(reject.as_str()) {
                return Err(ExecError::Failed("permission denied".to_string()));
            }
        }
        self.apply(statement)
    }

    fn savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        self.savepoints.push((name.to_string(), self.state.clone()));
        Ok(())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        match self.savepoints.iter().rev().find(|(n, _)| n == name) {
            Some((_, state)) => {
                self.state = state.clone();
                Ok(())
            }
            None => Err(ExecError::Failed(format!("savepoint \"{}\" does not exist", name))),
        }
    }

    fn release_savepoint(&mut self, name: &str) -> Result<(), ExecError> {
        match self.savepoints.iter().rposition(|(n, _)| n == name) {
            Some(index) => {
                self.savepoints.truncate(index);
                Ok(())
            }
            None => Err(ExecError::Failed(format!("savepoint \"{}\" does not exist", name))),
        }
    }
}
