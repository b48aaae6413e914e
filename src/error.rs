use crate::privilege::ObjectKind;
use thiserror::Error;

/// Problems found in a request before any statement is issued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid role_attr_flags specified: {}", .0.join(" "))]
    InvalidFlags(Vec<String>),

    #[error("conflicting role_attr_flags specified: {0} and NO{0}")]
    ConflictingFlags(String),

    #[error("invalid privs specified for {kind}: {}", .tokens.join(" "))]
    InvalidPrivileges {
        kind: ObjectKind,
        tokens: Vec<String>,
    },

    #[error("privileges require a database to be specified")]
    MissingDatabase,

    #[error("setting 'encrypted = false' is not supported")]
    UnencryptedPassword,

    #[error("invalid expires value '{value}': {reason}")]
    InvalidExpiry { value: String, reason: String },

    #[error("{0} is empty")]
    Empty(&'static str),
}

/// Everything that can stop a reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("role {role} does not exist")]
    MissingRole { role: String },

    #[error("role '{role}' is a member of role '{role}'")]
    SelfMembership { role: String },

    #[error("cannot change the {attempted} for {role} user")]
    ImmutableRole { role: String, attempted: String },

    #[error("{message} (statement: {statement})")]
    ReadOnlyTransaction { statement: String, message: String },

    #[error("cannot execute SQL '{statement}': {message}")]
    Execution { statement: String, message: String },

    #[error("unable to remove role {role}: {message}")]
    RoleRemoval { role: String, message: String },

    #[error("catalog read failed: {0:#}")]
    Catalog(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Missing roles and self-membership share the same fail/continue policy.
    pub fn is_missing_role(&self) -> bool {
        matches!(
            self,
            ReconcileError::MissingRole { .. } | ReconcileError::SelfMembership { .. }
        )
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, ReconcileError::ReadOnlyTransaction { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        let err = ValidationError::InvalidFlags(vec!["FOO".to_string(), "NOBAR".to_string()]);
        assert_eq!(err.to_string(), "invalid role_attr_flags specified: FOO NOBAR");

        let err = ValidationError::InvalidPrivileges {
            kind: ObjectKind::Table,
            tokens: vec!["CONNECT".to_string()],
        };
        assert_eq!(err.to_string(), "invalid privs specified for table: CONNECT");
    }

    #[test]
    fn test_missing_role_class() {
        let missing = ReconcileError::MissingRole {
            role: "readonly".to_string(),
        };
        let itself = ReconcileError::SelfMembership {
            role: "carol".to_string(),
        };
        assert!(missing.is_missing_role());
        assert!(itself.is_missing_role());
        assert_eq!(missing.to_string(), "role readonly does not exist");
        assert_eq!(itself.to_string(), "role 'carol' is a member of role 'carol'");

        let err: ReconcileError = ValidationError::MissingDatabase.into();
        assert!(!err.is_missing_role());
        assert!(!err.is_read_only());
    }
}
