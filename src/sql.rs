use crate::attributes::{AttributeChanges, PasswordChange};
use crate::directory::PUBLIC_ROLE;
use crate::privilege::{join_privileges, PrivObject, PrivilegeSet};
use std::fmt;
use thiserror::Error;

const REDACTED: &str = "********";

/// Quote an identifier (role, database, schema, table) with double quotes.
///
/// Every identifier that ends up in a statement goes through here.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal. Backslashes switch to the `E''` form so the
/// result means the same regardless of `standard_conforming_strings`.
///
/// Role DDL does not accept bind parameters, so passwords and expiry
/// values are escaped here instead.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

/// `PUBLIC` is a keyword in GRANT/REVOKE, not a role name.
fn quote_role(role: &str) -> String {
    if role == PUBLIC_ROLE {
        PUBLIC_ROLE.to_string()
    } else {
        quote_ident(role)
    }
}

fn quote_object(object: &PrivObject) -> String {
    match object {
        PrivObject::Database(name) => format!("DATABASE {}", quote_ident(name)),
        PrivObject::Table(table) => format!(
            "TABLE {}.{}",
            quote_ident(&table.schema),
            quote_ident(&table.name)
        ),
    }
}

/// One statement of a reconciliation plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateRole {
        role: String,
        attributes: AttributeChanges,
    },
    AlterRole {
        role: String,
        attributes: AttributeChanges,
    },
    DropRole {
        role: String,
    },
    Grant {
        object: PrivObject,
        privileges: PrivilegeSet,
        role: String,
    },
    Revoke {
        object: PrivObject,
        privileges: PrivilegeSet,
        role: String,
    },
    GrantMembership {
        group: String,
        member: String,
    },
    RevokeMembership {
        group: String,
        member: String,
    },
}

impl Statement {
    /// SQL text to send to the server.
    pub fn to_sql(&self) -> String {
        self.render(false)
    }

    /// SQL text with the password masked, for history and logs.
    pub fn redacted(&self) -> String {
        self.render(true)
    }

    /// Whether the statement changes role attributes rather than grants.
    pub fn is_role_ddl(&self) -> bool {
        matches!(
            self,
            Statement::CreateRole { .. } | Statement::AlterRole { .. } | Statement::DropRole { .. }
        )
    }

    fn render(&self, redact: bool) -> String {
        match self {
            Statement::CreateRole { role, attributes } => {
                role_statement("CREATE USER", role, attributes, redact)
            }
            Statement::AlterRole { role, attributes } => {
                role_statement("ALTER USER", role, attributes, redact)
            }
            Statement::DropRole { role } => format!("DROP USER {}", quote_ident(role)),
            Statement::Grant {
                object,
                privileges,
                role,
            } => format!(
                "GRANT {} ON {} TO {}",
                join_privileges(privileges),
                quote_object(object),
                quote_role(role)
            ),
            Statement::Revoke {
                object,
                privileges,
                role,
            } => format!(
                "REVOKE {} ON {} FROM {}",
                join_privileges(privileges),
                quote_object(object),
                quote_role(role)
            ),
            Statement::GrantMembership { group, member } => {
                format!("GRANT {} TO {}", quote_ident(group), quote_ident(member))
            }
            Statement::RevokeMembership { group, member } => {
                format!("REVOKE {} FROM {}", quote_ident(group), quote_ident(member))
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

// Clause order: password, validity, connection limit, flags.
fn role_statement(verb: &str, role: &str, attributes: &AttributeChanges, redact: bool) -> String {
    let mut clauses = vec![];

    match &attributes.password {
        Some(PasswordChange::Set(password)) => {
            let literal = if redact {
                quote_literal(REDACTED)
            } else {
                quote_literal(password)
            };
            clauses.push(format!("ENCRYPTED PASSWORD {}", literal));
        }
        Some(PasswordChange::Clear) => clauses.push("PASSWORD NULL".to_string()),
        None => (),
    }
    if let Some(valid_until) = &attributes.valid_until {
        clauses.push(format!("VALID UNTIL {}", quote_literal(valid_until)));
    }
    if let Some(limit) = attributes.conn_limit {
        clauses.push(format!("CONNECTION LIMIT {}", limit));
    }
    if !attributes.flags.is_empty() {
        clauses.push(attributes.flags.to_clause());
    }

    let mut sql = format!("{} {}", verb, quote_ident(role));
    if !clauses.is_empty() {
        sql.push_str(" WITH ");
        sql.push_str(&clauses.join(" "));
    }
    sql
}

/// How a statement failed on the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// SQLSTATE 25006, never retried
    #[error("{0}")]
    ReadOnly(String),

    #[error("{0}")]
    Failed(String),
}

/// Write access to one connection inside one transaction.
pub trait Session {
    fn begin(&mut self) -> anyhow::Result<()>;
    fn commit(&mut self) -> anyhow::Result<()>;
    fn rollback(&mut self) -> anyhow::Result<()>;

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecError>;

    fn savepoint(&mut self, name: &str) -> Result<(), ExecError>;
    fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), ExecError>;
    fn release_savepoint(&mut self, name: &str) -> Result<(), ExecError>;
}
